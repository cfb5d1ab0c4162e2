#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub key: &'static str,
}

/// Commands whose whole remainder is one text value.
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "link",
        action: "set_source_link",
        key: "url",
    },
    CommandSpec {
        command: "video",
        action: "set_video_url",
        key: "url",
    },
    CommandSpec {
        command: "start",
        action: "set_start",
        key: "value",
    },
    CommandSpec {
        command: "duration",
        action: "set_duration",
        key: "value",
    },
    CommandSpec {
        command: "model",
        action: "set_model",
        key: "model",
    },
    CommandSpec {
        command: "mode",
        action: "set_mode",
        key: "mode",
    },
];

pub(crate) const MULTI_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "add",
    action: "add_media",
    key: "paths",
}];

pub(crate) const INDEX_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "remove",
    action: "remove_media",
    key: "index",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "analyze",
        action: "analyze",
        key: "",
    },
    CommandSpec {
        command: "status",
        action: "status",
        key: "",
    },
    CommandSpec {
        command: "clear",
        action: "clear",
        key: "",
    },
    CommandSpec {
        command: "help",
        action: "help",
        key: "",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
        key: "",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
        key: "",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/add <paths...>",
    "/remove <n>",
    "/mode upload|video",
    "/link <url>",
    "/video <url>",
    "/start <timestamp>",
    "/duration <seconds>",
    "/model <name>",
    "/status",
    "/clear",
    "/analyze",
    "/help",
    "/quit",
];
