use std::fmt;

pub const WILDCARD: char = '*';

/// Job name selector typed by the operator. A trailing `*` selects by prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamePattern {
    Prefix(String),
    Exact(String),
}

impl NamePattern {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_suffix(WILDCARD) {
            Some(prefix) => NamePattern::Prefix(prefix.to_string()),
            None => NamePattern::Exact(raw.to_string()),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Prefix(prefix) => name.starts_with(prefix.as_str()),
            NamePattern::Exact(exact) => name == exact,
        }
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamePattern::Prefix(prefix) => write!(f, "{}{}", prefix, WILDCARD),
            NamePattern::Exact(exact) => f.write_str(exact),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Submit {
        template: String,
        args: String,
        name: String,
    },
    Resume(NamePattern),
    Cancel(NamePattern),
    Duplicate(NamePattern),
    Archive {
        pattern: Option<NamePattern>,
        all: bool,
    },
    Regenerate(NamePattern),
    Inspect(NamePattern),
    Pack(NamePattern),
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Text,
    /// Free text passed through untouched; may be empty.
    Args,
    Pattern,
    Flag,
}

#[derive(Debug, Clone, Copy)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamKind,
    pub optional: bool,
}

impl Param {
    const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            optional: false,
        }
    }

    const fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            optional: true,
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ParamKind::Text | ParamKind::Args => "",
            ParamKind::Pattern => "*",
            ParamKind::Flag => "!",
        };
        write!(f, "{}{}{}", self.name, kind, if self.optional { "?" } else { "" })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Submit,
    Resume,
    Cancel,
    Duplicate,
    Archive,
    Regenerate,
    Inspect,
    Pack,
    Exit,
}

pub struct CommandSpec {
    pub kind: CommandKind,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub params: &'static [Param],
    pub summary: &'static str,
}

impl CommandSpec {
    pub fn required_params(&self) -> usize {
        self.params.iter().filter(|p| !p.optional).count()
    }

    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.contains(&name)
    }
}

const PATTERN: Param = Param::required("name", ParamKind::Pattern);

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        kind: CommandKind::Submit,
        name: "submit",
        aliases: &["sub"],
        params: &[
            Param::required("template", ParamKind::Text),
            Param::required("args", ParamKind::Args),
            Param::required("name", ParamKind::Text),
        ],
        summary: "create and submit a new task",
    },
    CommandSpec {
        kind: CommandKind::Resume,
        name: "resume",
        aliases: &["cont"],
        params: &[PATTERN],
        summary: "resubmit dead, lost or cancelled tasks",
    },
    CommandSpec {
        kind: CommandKind::Cancel,
        name: "cancel",
        aliases: &[],
        params: &[PATTERN],
        summary: "cancel running or waiting jobs",
    },
    CommandSpec {
        kind: CommandKind::Duplicate,
        name: "duplicate",
        aliases: &["copy"],
        params: &[PATTERN],
        summary: "submit one fresh copy per matching name",
    },
    CommandSpec {
        kind: CommandKind::Archive,
        name: "archive",
        aliases: &["clean"],
        params: &[
            Param::optional("name", ParamKind::Pattern),
            Param::optional("all", ParamKind::Flag),
        ],
        summary: "drop finished and dead tasks from the log (backup first)",
    },
    CommandSpec {
        kind: CommandKind::Regenerate,
        name: "regenerate",
        aliases: &["regen"],
        params: &[PATTERN],
        summary: "rewrite job scripts without submitting",
    },
    CommandSpec {
        kind: CommandKind::Inspect,
        name: "inspect",
        aliases: &["show"],
        params: &[PATTERN],
        summary: "show arguments and output tails",
    },
    CommandSpec {
        kind: CommandKind::Pack,
        name: "pack",
        aliases: &[],
        params: &[PATTERN],
        summary: "hand task directories to the pack hook",
    },
    CommandSpec {
        kind: CommandKind::Exit,
        name: "exit",
        aliases: &["quit"],
        params: &[],
        summary: "leave taskman",
    },
];

pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.answers_to(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_pattern_matches_by_prefix() {
        let pattern = NamePattern::parse("job*");
        assert!(pattern.matches("jobA"));
        assert!(pattern.matches("jobB"));
        assert!(pattern.matches("job"));
        assert!(!pattern.matches("myjob"));
    }

    #[test]
    fn plain_pattern_requires_equality() {
        let pattern = NamePattern::parse("jobA");
        assert!(pattern.matches("jobA"));
        assert!(!pattern.matches("jobAB"));
        assert!(!pattern.matches("jobB"));
    }

    #[test]
    fn lone_wildcard_matches_everything() {
        assert!(NamePattern::parse("*").matches("anything"));
        assert_eq!(NamePattern::parse("*").to_string(), "*");
    }

    #[test]
    fn command_names_and_aliases_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for spec in COMMANDS {
            assert!(seen.insert(spec.name), "{}", spec.name);
            for alias in spec.aliases {
                assert!(seen.insert(*alias), "{}", alias);
            }
        }
        assert_eq!(lookup("copy").map(|s| s.kind), Some(CommandKind::Duplicate));
        assert!(lookup("nope").is_none());
    }
}
