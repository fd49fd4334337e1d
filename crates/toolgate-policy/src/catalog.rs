//! Static tool tables: group membership, risk levels, and per-context
//! restrictions.
//!
//! The tool universe is closed. The engine never discovers tools from its
//! input; a tool that is not listed here has no classification.

use std::sync::LazyLock;

use toolgate_protocol::{GatewayContext, ToolGroup, ToolRiskLevel};

pub const READ_FILE: &str = "read_file";
pub const DELETE_FILE: &str = "delete_file";
pub const RUN_COMMAND: &str = "run_command";
pub const READ_CLIPBOARD: &str = "read_clipboard";

const READ_TOOLS: &[&str] = &[READ_FILE, "list_directory", "search_files", "get_file_info"];

const WRITE_TOOLS: &[&str] = &[
    "write_file",
    "edit_file",
    "create_directory",
    "copy_file",
    "rename_file",
];

const DESTRUCTIVE_TOOLS: &[&str] = &[DELETE_FILE, RUN_COMMAND];

const SYSTEM_TOOLS: &[&str] = &[
    RUN_COMMAND,
    READ_CLIPBOARD,
    "write_clipboard",
    "take_screenshot",
    "open_application",
    "open_url",
];

const NETWORK_TOOLS: &[&str] = &["web_search", "web_fetch", "http_request", "browser_navigate"];

const MEMORY_TOOLS: &[&str] = &[
    READ_CLIPBOARD,
    "write_clipboard",
    "memory_search",
    "memory_save",
];

const IMAGE_TOOLS: &[&str] = &["generate_image", "analyze_image"];

const META_TOOLS: &[&str] = &["spawn_agent", "list_tools", "set_personality", "schedule_task"];

const RISK_LEVELS: &[(&str, ToolRiskLevel)] = &[
    (READ_FILE, ToolRiskLevel::Read),
    ("list_directory", ToolRiskLevel::Read),
    ("search_files", ToolRiskLevel::Read),
    ("get_file_info", ToolRiskLevel::Read),
    ("write_file", ToolRiskLevel::Write),
    ("edit_file", ToolRiskLevel::Write),
    ("create_directory", ToolRiskLevel::Write),
    ("copy_file", ToolRiskLevel::Write),
    ("rename_file", ToolRiskLevel::Write),
    (DELETE_FILE, ToolRiskLevel::Destructive),
    (RUN_COMMAND, ToolRiskLevel::System),
    (READ_CLIPBOARD, ToolRiskLevel::Read),
    ("write_clipboard", ToolRiskLevel::Write),
    ("take_screenshot", ToolRiskLevel::System),
    ("open_application", ToolRiskLevel::System),
    ("open_url", ToolRiskLevel::System),
    ("web_search", ToolRiskLevel::Network),
    ("web_fetch", ToolRiskLevel::Network),
    ("http_request", ToolRiskLevel::Network),
    ("browser_navigate", ToolRiskLevel::Network),
    ("memory_search", ToolRiskLevel::Read),
    ("memory_save", ToolRiskLevel::Write),
    ("generate_image", ToolRiskLevel::Write),
    ("analyze_image", ToolRiskLevel::Read),
    ("spawn_agent", ToolRiskLevel::System),
    ("list_tools", ToolRiskLevel::Read),
    ("set_personality", ToolRiskLevel::Write),
    ("schedule_task", ToolRiskLevel::Write),
];

/// Members of `group`.
pub fn group_members(group: ToolGroup) -> &'static [&'static str] {
    match group {
        ToolGroup::Read => READ_TOOLS,
        ToolGroup::Write => WRITE_TOOLS,
        ToolGroup::Destructive => DESTRUCTIVE_TOOLS,
        ToolGroup::System => SYSTEM_TOOLS,
        ToolGroup::Network => NETWORK_TOOLS,
        ToolGroup::Memory => MEMORY_TOOLS,
        ToolGroup::Image => IMAGE_TOOLS,
        ToolGroup::Meta => META_TOOLS,
    }
}

pub fn in_group(tool: &str, group: ToolGroup) -> bool {
    group_members(group).contains(&tool)
}

pub fn risk_level(tool: &str) -> Option<ToolRiskLevel> {
    RISK_LEVELS
        .iter()
        .find(|(name, _)| *name == tool)
        .map(|(_, level)| *level)
}

static ALL_TOOLS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    let mut tools: Vec<&'static str> = ToolGroup::ALL
        .into_iter()
        .flat_map(group_members)
        .copied()
        .chain(RISK_LEVELS.iter().map(|(name, _)| *name))
        .collect();
    tools.sort_unstable();
    tools.dedup();
    tools
});

/// Union of every group member and every risk table entry, sorted.
pub fn all_tools() -> &'static [&'static str] {
    &ALL_TOOLS
}

/// What a gateway context forbids or gates.
#[derive(Debug, Clone, Copy)]
pub struct ContextRestriction {
    pub denied_groups: &'static [ToolGroup],
    pub denied_tools: &'static [&'static str],
    pub require_approval_for: &'static [&'static str],
}

const PRIVATE_RESTRICTION: ContextRestriction = ContextRestriction {
    denied_groups: &[],
    denied_tools: &[],
    require_approval_for: &[],
};

const GROUP_RESTRICTION: ContextRestriction = ContextRestriction {
    denied_groups: &[ToolGroup::Memory],
    denied_tools: &["set_personality"],
    require_approval_for: &[
        "write_file",
        "edit_file",
        "rename_file",
        "http_request",
        "spawn_agent",
    ],
};

const PUBLIC_RESTRICTION: ContextRestriction = ContextRestriction {
    denied_groups: &[ToolGroup::Memory, ToolGroup::Destructive, ToolGroup::System],
    denied_tools: &[
        "write_file",
        "edit_file",
        "rename_file",
        "spawn_agent",
        "set_personality",
        "schedule_task",
    ],
    require_approval_for: &["web_fetch", "http_request", "browser_navigate", "generate_image"],
};

pub fn context_restriction(context: GatewayContext) -> &'static ContextRestriction {
    match context {
        GatewayContext::Private => &PRIVATE_RESTRICTION,
        GatewayContext::Group => &GROUP_RESTRICTION,
        GatewayContext::Public => &PUBLIC_RESTRICTION,
    }
}
