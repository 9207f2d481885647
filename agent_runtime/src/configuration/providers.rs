// Layered configuration providers and installation-directory resolution.
//
// The installation directory anchors every relative path the agent touches
// (trust material in particular), so it must never fall back to the host
// process's working directory. Resolution order: explicit providers, then
// the tool-options environment variable, then the process command line,
// then ".".

use std::collections::HashMap;
use std::sync::Arc;

/// Configuration key naming the agent installation directory.
pub const INSTALLATION_DIR: &str = "installationDir";

/// Environment variable carrying host launch options (`-agentpath:...`).
pub const TOOL_OPTIONS_ENV: &str = "JAVA_TOOL_OPTIONS";

const AGENT_PATH_OPTION: &str = "-agentpath:";

// ============================================================================
// PROVIDER CHAIN
// ============================================================================

/// One source of configuration values.
///
/// Providers are consulted in ascending priority order with last-wins
/// semantics, so among providers carrying the same key the highest priority
/// wins and equal priorities break toward the later provider.
pub trait ConfigurationProvider: Send + Sync {
    fn priority(&self) -> i32;
    fn configuration(&self) -> HashMap<String, String>;
}

/// Fixed key-value provider, for explicit/externally parsed configuration.
#[derive(Debug, Clone)]
pub struct MapConfigurationProvider {
    priority: i32,
    values: HashMap<String, String>,
}

impl MapConfigurationProvider {
    pub fn new(priority: i32, values: HashMap<String, String>) -> Self {
        MapConfigurationProvider { priority, values }
    }
}

impl ConfigurationProvider for MapConfigurationProvider {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn configuration(&self) -> HashMap<String, String> {
        self.values.clone()
    }
}

// ============================================================================
// INSTALLATION DIRECTORY
// ============================================================================

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;
type CommandLine = Box<dyn Fn() -> Option<String> + Send + Sync>;

/// Resolves the agent installation directory.
///
/// Itself a [`ConfigurationProvider`] so it slots into the provider chain
/// (priority 300, like any explicit source it may be overridden by a
/// higher-priority provider downstream).
pub struct InstallationDirProvider {
    providers: Vec<Arc<dyn ConfigurationProvider>>,
    env: Lookup,
    command_line: CommandLine,
    priority: i32,
}

impl InstallationDirProvider {
    /// Provider reading the real process environment and command line.
    pub fn new(providers: Vec<Arc<dyn ConfigurationProvider>>) -> Self {
        Self::with_lookups(
            providers,
            Box::new(|name| std::env::var(name).ok()),
            Box::new(|| {
                std::env::args()
                    .collect::<Vec<_>>()
                    .join(" ")
                    .into()
            }),
        )
    }

    /// Provider with injected environment/command-line access (tests, hosts
    /// that expose these some other way).
    pub fn with_lookups(
        providers: Vec<Arc<dyn ConfigurationProvider>>,
        env: Lookup,
        command_line: CommandLine,
    ) -> Self {
        InstallationDirProvider {
            providers,
            env,
            command_line,
            priority: 300,
        }
    }

    /// The resolved installation directory.
    pub fn installation_dir(&self) -> String {
        self.from_providers()
            .or_else(|| self.from_tool_options())
            .or_else(|| self.from_command_line())
            .unwrap_or_else(|| ".".to_string())
    }

    fn from_providers(&self) -> Option<String> {
        let mut providers: Vec<&Arc<dyn ConfigurationProvider>> = self.providers.iter().collect();
        providers.sort_by_key(|p| p.priority());
        providers
            .iter()
            .filter_map(|p| p.configuration().get(INSTALLATION_DIR).cloned())
            .last()
    }

    fn from_tool_options(&self) -> Option<String> {
        (self.env)(TOOL_OPTIONS_ENV).and_then(|options| parse_agent_path_dir(&options))
    }

    fn from_command_line(&self) -> Option<String> {
        (self.command_line)().and_then(|line| parse_agent_path_dir(&line))
    }
}

impl ConfigurationProvider for InstallationDirProvider {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn configuration(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert(INSTALLATION_DIR.to_string(), self.installation_dir());
        map
    }
}

/// Extracts the agent library's directory from an `-agentpath:<path>=<opts>`
/// occurrence: the segment after the option, before `=`, trimmed to its
/// parent directory.
fn parse_agent_path_dir(input: &str) -> Option<String> {
    let after = input.split_once(AGENT_PATH_OPTION)?.1;
    let path = after.split_once('=').map(|(p, _)| p).unwrap_or(after);
    let path = path.split_whitespace().next().unwrap_or(path);
    match path.rsplit_once(path_separator()) {
        Some((dir, _)) if !dir.is_empty() => Some(dir.to_string()),
        Some(_) => Some(path_separator().to_string()),
        None => Some(path.to_string()),
    }
}

fn path_separator() -> char {
    if cfg!(windows) {
        '\\'
    } else {
        '/'
    }
}
