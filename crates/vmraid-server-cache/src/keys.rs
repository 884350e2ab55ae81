// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Registered cache keys, grouped by invalidation tier.

/// Parents whose defaults apply to every user.
pub const COMMON_DEFAULT_KEYS: [&str; 2] = ["__default", "__global"];

/// Rule lookup hashes filled by `get_doctype_map`.
pub const DOCTYPE_MAP_KEYS: &[&str] = &[
	"energy_point_rule_map",
	"assignment_rule_map",
	"milestone_tracker_map",
	"event_consumer_document_type_map",
];

/// Keys shared by every process serving a chair of sites.
pub const CHAIR_CACHE_KEYS: &[&str] = &["assets_json"];

pub const GLOBAL_CACHE_KEYS: &[&str] = &[
	"app_hooks",
	"installed_apps",
	"all_apps",
	"app_modules",
	"module_app",
	"system_settings",
	"scheduler_events",
	"time_zone",
	"webhooks",
	"active_domains",
	"active_modules",
	"assignment_rule",
	"server_script_map",
	"wkhtmltopdf_version",
	"domain_restricted_doctypes",
	"domain_restricted_pages",
	"information_schema:counts",
	"sitemap_routes",
	"db_tables",
	"server_script_autocompletion_items",
];

/// Hashes keyed by user name.
pub const USER_CACHE_KEYS: &[&str] = &[
	"bootinfo",
	"user_recent",
	"roles",
	"user_doc",
	"lang",
	"defaults",
	"user_permissions",
	"home_page",
	"linked_with",
	"desktop_icons",
	"portal_menu_items",
	"user_perm_can_read",
	"has_role:Page",
	"has_role:Report",
	"desk_sidebar_items",
];

/// Hashes keyed by doctype name.
pub const DOCTYPE_CACHE_KEYS: &[&str] = &[
	"meta",
	"form_meta",
	"table_columns",
	"last_modified",
	"linked_doctypes",
	"notifications",
	"workflow",
	"data_import_column_header_map",
];

/// Flat keys derived from doctype metadata.
pub const DOCTYPE_SHARED_KEYS: &[&str] = &["is_table", "doctype_modules", "document_cache"];

pub const DOMAIN_CACHE_KEYS: &[&str] = &["domain_restricted_doctypes", "domain_restricted_pages"];

pub const WEBSITE_CACHE_KEYS: &[&str] = &[
	"portal_menu_items",
	"home_page",
	"website_route_rules",
	"doctypes_with_web_view",
	"website_redirects",
	"page_context",
	"website_page",
];

pub const DEFAULTS_KEY: &str = "defaults";
pub const DOCUMENT_CACHE_KEY: &str = "document_cache";
pub const NOTIFICATION_COUNT_PREFIX: &str = "notification_count:";

/// Lowercase with spaces and dashes turned into underscores.
pub fn scrub(text: &str) -> String {
	text.replace([' ', '-'], "_").to_lowercase()
}

/// Hash holding cached rule lists for `doctype`.
pub fn doctype_map_key(doctype: &str) -> String {
	format!("{}_map", scrub(doctype))
}

pub fn notification_count_key(group: &str) -> String {
	format!("{NOTIFICATION_COUNT_PREFIX}{group}")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_scrub() {
		assert_eq!(scrub("Assignment Rule"), "assignment_rule");
		assert_eq!(scrub("Event-Consumer Document Type"), "event_consumer_document_type");
	}

	#[test]
	fn test_doctype_map_keys_are_registered() {
		for doctype in [
			"Energy Point Rule",
			"Assignment Rule",
			"Milestone Tracker",
			"Event Consumer Document Type",
		] {
			assert!(DOCTYPE_MAP_KEYS.contains(&doctype_map_key(doctype).as_str()));
		}
	}

	#[test]
	fn test_user_defaults_live_in_user_tier() {
		assert!(USER_CACHE_KEYS.contains(&DEFAULTS_KEY));
		assert!(DOCTYPE_SHARED_KEYS.contains(&DOCUMENT_CACHE_KEY));
	}
}
