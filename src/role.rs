//! Roles: named system prompts that frame a conversation.
//!
//! Roles live in a directory, one `<name>.json` file per role. Four roles are
//! built in and written to the directory the first time it is used.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::{from_reader, to_writer_pretty};
use utf8path::Path;

use crate::error::{Error, Result};
use crate::types::ChatMessage;

/// Name of the general-purpose role.
pub const DEFAULT_ROLE: &str = "ShellGPT";
/// Name of the role that writes shell commands.
pub const SHELL_ROLE: &str = "Shell Command Generator";
/// Name of the role that explains shell commands.
pub const DESCRIBE_SHELL_ROLE: &str = "Shell Command Descriptor";
/// Name of the role that writes code.
pub const CODE_ROLE: &str = "Code Generator";

/// Roles whose body contains this phrase are rendered as markdown.
const MARKDOWN_MARKER: &str = "APPLY MARKDOWN";

const DEFAULT_BODY: &str = "You are programming and system administration assistant.
You are managing {os} operating system with {shell} shell.
Provide short responses in about 100 words, unless you are specifically asked for more details.
If you need to store any data, assume it will be stored in the conversation.
APPLY MARKDOWN formatting when possible.";

const SHELL_BODY: &str = "Provide only {shell} commands for {os} without any description.
If there is a lack of details, provide most logical solution.
Ensure the output is a valid shell command.
If multiple steps required try to combine them together using &&.
Provide only plain text without Markdown formatting.
Do not provide markdown formatting such as ```.";

const DESCRIBE_SHELL_BODY: &str = "Provide a terse, single sentence description of the given shell command.
Describe each argument and option of the command.
Provide short responses in about 80 words.
APPLY MARKDOWN formatting when possible.";

const CODE_BODY: &str = "Provide only code as output without any description.
Provide only code in plain text format without Markdown formatting.
Do not include symbols such as ``` or ```python.
If there is a lack of details, provide most logical solution.
You are not allowed to ask for more details.
For example if the prompt is \"Hello world Python\", you should return \"print('Hello world')\".";

/// The roles that ship with shellgpt.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DefaultRole {
    /// Free-form assistant.
    Default,
    /// Shell command generation.
    Shell,
    /// Shell command description.
    DescribeShell,
    /// Code generation.
    Code,
}

impl DefaultRole {
    /// All built-in roles.
    pub const ALL: [DefaultRole; 4] = [
        DefaultRole::Default,
        DefaultRole::Shell,
        DefaultRole::DescribeShell,
        DefaultRole::Code,
    ];

    /// The stored name of the role.
    pub fn name(&self) -> &'static str {
        match self {
            DefaultRole::Default => DEFAULT_ROLE,
            DefaultRole::Shell => SHELL_ROLE,
            DefaultRole::DescribeShell => DESCRIBE_SHELL_ROLE,
            DefaultRole::Code => CODE_ROLE,
        }
    }

    /// What kind of output the role produces.
    pub fn expecting(&self) -> &'static str {
        match self {
            DefaultRole::Default => "Answer",
            DefaultRole::Shell => "Command",
            DefaultRole::DescribeShell => "Description",
            DefaultRole::Code => "Code",
        }
    }

    fn body(&self) -> &'static str {
        match self {
            DefaultRole::Default => DEFAULT_BODY,
            DefaultRole::Shell => SHELL_BODY,
            DefaultRole::DescribeShell => DESCRIBE_SHELL_BODY,
            DefaultRole::Code => CODE_BODY,
        }
    }

    /// The built-in role called `name`, if any.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.name() == name)
    }

    /// Materialize the role for a given shell and operating system.
    pub fn role(&self, shell: &str, os: &str) -> Role {
        let body = self.body().replace("{shell}", shell).replace("{os}", os);
        Role::new(self.name(), body, self.expecting())
    }
}

/// A named system prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Unique name of the role.
    pub name: String,
    /// Instructions for the model.
    pub role: String,
    /// Label for the kind of output the role produces.
    #[serde(default = "default_expecting")]
    pub expecting: String,
}

fn default_expecting() -> String {
    "Answer".to_string()
}

impl Role {
    /// Create a new role.
    pub fn new(
        name: impl Into<String>,
        role: impl Into<String>,
        expecting: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            expecting: expecting.into(),
        }
    }

    /// The system prompt that opens conversations held in this role.
    pub fn system_prompt(&self) -> String {
        format!("You are {}\n{}", self.name, self.role)
    }

    /// The system message that opens conversations held in this role.
    pub fn system_message(&self) -> ChatMessage {
        ChatMessage::system(self.system_prompt())
    }

    /// The built-in role this is, if any.
    pub fn builtin(&self) -> Option<DefaultRole> {
        DefaultRole::from_name(&self.name)
    }

    /// True for the general-purpose role.
    pub fn is_default(&self) -> bool {
        self.builtin() == Some(DefaultRole::Default)
    }

    /// True for the shell-command role.
    pub fn is_shell(&self) -> bool {
        self.builtin() == Some(DefaultRole::Shell)
    }

    /// True if the model may call functions while in this role.
    ///
    /// Shell, describe-shell and code roles want bare text back.
    pub fn allows_functions(&self) -> bool {
        !matches!(
            self.builtin(),
            Some(DefaultRole::Shell | DefaultRole::DescribeShell | DefaultRole::Code)
        )
    }

    /// True if answers in this role should be rendered as markdown.
    pub fn wants_markdown(&self) -> bool {
        self.role.contains(MARKDOWN_MARKER)
    }

    /// True if `initial_prompt` opened a conversation in this role.
    pub fn same_role(&self, initial_prompt: &str) -> bool {
        Self::name_from_prompt(initial_prompt).as_deref() == Some(self.name.as_str())
    }

    /// The role name recorded in the first line of a system prompt.
    pub fn name_from_prompt(initial_prompt: &str) -> Option<String> {
        let first = initial_prompt.lines().next()?;
        let (_, name) = first.split_once("You are ")?;
        let name = name.trim();
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.role)
    }
}

/// Pick the role for an invocation from its flags.
///
/// At most one of `shell`, `code` and `describe_shell` may be set, and none of
/// them may be combined with an explicit role.
pub fn resolve(
    roles: &RoleStore,
    shell: bool,
    code: bool,
    describe_shell: bool,
    explicit: Option<&str>,
) -> Result<Role> {
    let flags = [shell, code, describe_shell]
        .into_iter()
        .filter(|f| *f)
        .count();
    if flags > 1 {
        return Err(Error::validation(
            "only one of --shell, --describe-shell, and --code can be used at a time",
            None,
        ));
    }
    if flags > 0 && explicit.is_some() {
        return Err(Error::validation(
            "--role cannot be combined with --shell, --describe-shell, or --code",
            Some("--role".to_string()),
        ));
    }
    let name = match (shell, code, describe_shell, explicit) {
        (true, _, _, _) => SHELL_ROLE,
        (_, true, _, _) => CODE_ROLE,
        (_, _, true, _) => DESCRIBE_SHELL_ROLE,
        (_, _, _, Some(name)) => name,
        _ => DEFAULT_ROLE,
    };
    roles.get(name)
}

///////////////////////////////////////////// RoleStore /////////////////////////////////////////////

/// A directory of roles.
#[derive(Debug, Clone)]
pub struct RoleStore {
    dir: Path<'static>,
    shell: String,
    os: String,
}

impl RoleStore {
    /// Open (creating if needed) the role directory at `dir`.
    ///
    /// `shell` and `os` fill the `{shell}` and `{os}` placeholders of the built-in roles.
    pub fn new(dir: &Path, shell: impl Into<String>, os: impl Into<String>) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|err| Error::io("failed to create role directory", err))?;
        Ok(Self {
            dir: dir.clone().into_owned(),
            shell: shell.into(),
            os: os.into(),
        })
    }

    fn path(&self, name: &str) -> Path<'static> {
        self.dir.join(format!("{name}.json").as_str()).into_owned()
    }

    fn check_name(name: &str) -> Result<()> {
        if name.trim().is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(Error::validation(
                format!("\"{name}\" is not a valid role name"),
                Some("--role".to_string()),
            ));
        }
        Ok(())
    }

    /// Write any built-in role that is not stored yet. Existing roles are left alone.
    pub fn ensure_defaults(&self) -> Result<()> {
        for builtin in DefaultRole::ALL {
            if !self.exists(builtin.name()) {
                self.save(&builtin.role(&self.shell, &self.os))?;
            }
        }
        Ok(())
    }

    /// True if a role named `name` is stored.
    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// Load the role named `name`.
    pub fn get(&self, name: &str) -> Result<Role> {
        Self::check_name(name)?;
        let file = match File::open(self.path(name)) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found("role", format!("\"{name}\"")));
            }
            Err(err) => return Err(Error::io("failed to open role", err)),
        };
        from_reader(BufReader::new(file)).map_err(|err| {
            Error::serialization(format!("failed to parse role \"{name}\""), Some(Box::new(err)))
        })
    }

    /// Store a new role. An existing role is replaced only if `overwrite` is set.
    pub fn create(&self, role: &Role, overwrite: bool) -> Result<()> {
        Self::check_name(&role.name)?;
        if self.exists(&role.name) && !overwrite {
            return Err(Error::validation(
                format!("role \"{}\" already exists", role.name),
                Some("--create-role".to_string()),
            ));
        }
        self.save(role)
    }

    fn save(&self, role: &Role) -> Result<()> {
        let file = File::create(self.path(&role.name))
            .map_err(|err| Error::io("failed to create role file", err))?;
        to_writer_pretty(BufWriter::new(file), role).map_err(|err| {
            Error::serialization("failed to serialize role", Some(Box::new(err)))
        })?;
        tracing::debug!(role = %role.name, "saved role");
        Ok(())
    }

    /// Paths of all stored roles, least recently modified first.
    pub fn list(&self) -> Result<Vec<Path<'static>>> {
        let mut roles = Vec::new();
        for dirent in
            std::fs::read_dir(&self.dir).map_err(|err| Error::io("failed to list roles", err))?
        {
            let dirent = dirent.map_err(|err| Error::io("failed to list roles", err))?;
            let metadata = dirent
                .metadata()
                .map_err(|err| Error::io("failed to stat role", err))?;
            if !metadata.is_file() {
                continue;
            }
            let Ok(path) = Path::try_from(dirent.path()) else {
                continue;
            };
            if !path.as_str().ends_with(".json") {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            roles.push((modified, path.into_owned()));
        }
        roles.sort_by(|lhs, rhs| {
            lhs.0
                .cmp(&rhs.0)
                .then_with(|| lhs.1.as_str().cmp(rhs.1.as_str()))
        });
        Ok(roles.into_iter().map(|(_, path)| path).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> RoleStore {
        let path = Path::try_from(dir.path().to_path_buf()).unwrap();
        let store = RoleStore::new(&path, "zsh", "Darwin/MacOS").unwrap();
        store.ensure_defaults().unwrap();
        store
    }

    #[test]
    fn defaults_are_materialized_once() {
        let dir = tempfile::tempdir().unwrap();
        let roles = store(&dir);
        assert_eq!(roles.list().unwrap().len(), 4);

        let custom = Role::new(DEFAULT_ROLE, "customized", "Answer");
        roles.create(&custom, true).unwrap();
        roles.ensure_defaults().unwrap();
        assert_eq!(roles.get(DEFAULT_ROLE).unwrap().role, "customized");
    }

    #[test]
    fn placeholders_are_filled() {
        let dir = tempfile::tempdir().unwrap();
        let shell = store(&dir).get(SHELL_ROLE).unwrap();
        assert!(shell.role.starts_with("Provide only zsh commands for Darwin/MacOS"));
        assert_eq!(shell.expecting, "Command");
        assert!(
            shell
                .system_prompt()
                .starts_with("You are Shell Command Generator\n")
        );
    }

    #[test]
    fn markdown_and_functions_follow_role() {
        let dir = tempfile::tempdir().unwrap();
        let roles = store(&dir);
        let default = roles.get(DEFAULT_ROLE).unwrap();
        assert!(default.wants_markdown());
        assert!(default.allows_functions());
        let shell = roles.get(SHELL_ROLE).unwrap();
        assert!(!shell.wants_markdown());
        assert!(!shell.allows_functions());
        assert!(!roles.get(CODE_ROLE).unwrap().allows_functions());
        assert!(!roles.get(DESCRIBE_SHELL_ROLE).unwrap().allows_functions());
    }

    #[test]
    fn resolve_flags() {
        let dir = tempfile::tempdir().unwrap();
        let roles = store(&dir);
        assert_eq!(resolve(&roles, false, false, false, None).unwrap().name, DEFAULT_ROLE);
        assert_eq!(resolve(&roles, true, false, false, None).unwrap().name, SHELL_ROLE);
        assert_eq!(resolve(&roles, false, true, false, None).unwrap().name, CODE_ROLE);
        assert_eq!(
            resolve(&roles, false, false, true, None).unwrap().name,
            DESCRIBE_SHELL_ROLE
        );
        assert_eq!(
            resolve(&roles, false, false, false, Some(CODE_ROLE)).unwrap().name,
            CODE_ROLE
        );
    }

    #[test]
    fn resolve_rejects_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let roles = store(&dir);
        assert!(resolve(&roles, true, true, false, None).unwrap_err().is_validation());
        assert!(resolve(&roles, false, true, true, None).unwrap_err().is_validation());
        assert!(
            resolve(&roles, true, false, false, Some("pirate"))
                .unwrap_err()
                .is_validation()
        );
    }

    #[test]
    fn unknown_role_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let roles = store(&dir);
        assert!(roles.get("pirate").unwrap_err().is_not_found());
        assert!(roles.get("../escape").unwrap_err().is_validation());
    }

    #[test]
    fn create_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let roles = store(&dir);
        let pirate = Role::new("pirate", "Talk like a pirate.", "Answer");
        roles.create(&pirate, false).unwrap();
        assert!(roles.create(&pirate, false).unwrap_err().is_validation());
        assert_eq!(roles.get("pirate").unwrap(), pirate);
    }

    #[test]
    fn same_role_and_name_extraction() {
        let role = Role::new("pirate", "Talk like a pirate.", "Answer");
        let prompt = role.system_prompt();
        assert!(role.same_role(&prompt));
        assert!(!role.same_role(""));
        assert!(!Role::new("ninja", "", "Answer").same_role(&prompt));
        assert_eq!(Role::name_from_prompt(&prompt).as_deref(), Some("pirate"));
        assert_eq!(Role::name_from_prompt("no marker here"), None);
    }

    #[test]
    fn role_name_prefix_is_not_the_same_role() {
        let generator = Role::new("Shell Command Generator", "Emit commands.", "Command");
        let prompt = generator.system_prompt();
        assert!(!Role::new("Shell", "", "Command").same_role(&prompt));
        assert!(generator.same_role(&prompt));
    }
}
