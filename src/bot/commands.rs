//! Chat command parsing and the help catalog

/// A parsed incoming text message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Upload,
    Update(Option<String>),
    Activate(Option<String>),
    Workflows,
    Remove(Option<String>),
    Info,
    /// A slash command the bot does not know
    Unknown(String),
    /// Plain text: a chat turn, or a workflow name during an upload
    Text(String),
}

impl Command {
    /// Parse a message. Commands may carry a `@botname` suffix
    /// (`/activate@relay_bot triage`); only the first argument is used.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        let Some(body) = trimmed.strip_prefix('/') else {
            return Command::Text(text.to_string());
        };

        let mut parts = body.split_whitespace();
        let head = parts.next().unwrap_or_default();
        let name = head.split('@').next().unwrap_or_default().to_ascii_lowercase();
        let arg = parts.next().map(str::to_string);

        match name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "upload" => Command::Upload,
            "update" => Command::Update(arg),
            "activate" => Command::Activate(arg),
            "workflows" => Command::Workflows,
            "remove" => Command::Remove(arg),
            "info" => Command::Info,
            _ => Command::Unknown(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Group {
    Workflow,
    Conversation,
    General,
    Hidden,
}

/// A command as advertised to users
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: &'static str,
    pub description: &'static str,
    pub takes_name: bool,
    group: Group,
}

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "start",
        description: "Start the bot",
        takes_name: false,
        group: Group::Hidden,
    },
    CommandSpec {
        command: "upload",
        description: "Upload a new workflow file",
        takes_name: false,
        group: Group::Workflow,
    },
    CommandSpec {
        command: "update",
        description: "Replace an existing workflow's file",
        takes_name: true,
        group: Group::Workflow,
    },
    CommandSpec {
        command: "workflows",
        description: "List your workflows",
        takes_name: false,
        group: Group::Workflow,
    },
    CommandSpec {
        command: "activate",
        description: "Switch this chat to a workflow",
        takes_name: true,
        group: Group::Workflow,
    },
    CommandSpec {
        command: "remove",
        description: "Delete a workflow",
        takes_name: true,
        group: Group::Workflow,
    },
    CommandSpec {
        command: "info",
        description: "Show the active workflow",
        takes_name: false,
        group: Group::Conversation,
    },
    CommandSpec {
        command: "help",
        description: "Show available commands",
        takes_name: false,
        group: Group::General,
    },
];

/// Render the grouped command list
pub fn help_message() -> String {
    let mut message = String::from("Available Commands:\n\n");

    for (group, title) in [
        (Group::Workflow, "Workflow Management"),
        (Group::Conversation, "Conversation"),
        (Group::General, "General"),
    ] {
        let entries: Vec<_> = COMMANDS.iter().filter(|c| c.group == group).collect();
        if entries.is_empty() {
            continue;
        }
        message.push_str(title);
        message.push_str(":\n");
        for cmd in entries {
            let usage = if cmd.takes_name { " <name>" } else { "" };
            message.push_str(&format!("/{}{usage} - {}\n", cmd.command, cmd.description));
        }
        message.push('\n');
    }

    message.push_str("Just send a message to chat with your active workflow!");
    message
}
