use regex::Regex;
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// Top-level configuration loaded from crashtrace.toml.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub paths: PathsConfig,
    pub recorder: RecorderConfig,
    pub archive: ArchiveConfig,
    pub dumps: DumpsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub process_name: String,
    pub poll_interval_secs: u64,
    pub flush_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Scratch directory the recorder writes into continuously.
    pub working_dir: PathBuf,
    /// Where the OS drops crash reports (WER LocalDumps).
    pub crash_dumps_dir: PathBuf,
    /// Durable archive destination for crash-correlated traces.
    pub output_dir: PathBuf,
    pub watermark_file: PathBuf,
    /// Holds the status file, history database and singleton lock.
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub command: String,
    /// Argument template. `{out}` and `{process}` are substituted at launch.
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub finalized_suffixes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DumpsConfig {
    /// Write the OS crash-dump setting at startup.
    pub configure: bool,
    pub dump_type: DumpType,
}

/// WER `LocalDumps\DumpType` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpType {
    Custom,
    Mini,
    Full,
}

impl DumpType {
    pub fn registry_value(self) -> u32 {
        match self {
            DumpType::Custom => 0,
            DumpType::Mini => 1,
            DumpType::Full => 2,
        }
    }
}

// --- Default implementations ---

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            process_name: "myprocess.exe".to_string(),
            poll_interval_secs: 10,
            flush_grace_secs: 10,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from(r"C:\temp_ttd_traces"),
            crash_dumps_dir: PathBuf::from(r"%LOCALAPPDATA%\CrashDumps"),
            output_dir: PathBuf::from(r"C:\final_ttd_traces"),
            watermark_file: PathBuf::from(r"%WINDIR%\temp\last_dump_timestamp.txt"),
            state_dir: PathBuf::from(".crashtrace"),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            command: "ttd.exe".to_string(),
            args: vec![
                "-out".to_string(),
                "{out}".to_string(),
                "-monitor".to_string(),
                "{process}".to_string(),
            ],
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            finalized_suffixes: vec![".out".to_string(), ".run".to_string()],
        }
    }
}

impl Default for DumpsConfig {
    fn default() -> Self {
        Self {
            configure: true,
            dump_type: DumpType::Full,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn flush_grace(&self) -> Duration {
        Duration::from_secs(self.flush_grace_secs)
    }
}

/// Values from the command line that take precedence over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub process_name: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub crash_dumps_dir: Option<PathBuf>,
    pub poll_interval_secs: Option<u64>,
}

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl Config {
    /// Load config from `path`, falling back to defaults when the file does not exist.
    ///
    /// The result has CLI overrides applied, environment references expanded
    /// in every path, and has passed validation.
    pub fn load(path: &Path, overrides: Overrides) -> Result<Config, ConfigError> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file not found, using defaults");
                Config::default()
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        config.apply(overrides);
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, overrides: Overrides) {
        if let Some(name) = overrides.process_name {
            self.monitor.process_name = name;
        }
        if let Some(dir) = overrides.working_dir {
            self.paths.working_dir = dir;
        }
        if let Some(dir) = overrides.output_dir {
            self.paths.output_dir = dir;
        }
        if let Some(dir) = overrides.crash_dumps_dir {
            self.paths.crash_dumps_dir = dir;
        }
        if let Some(secs) = overrides.poll_interval_secs {
            self.monitor.poll_interval_secs = secs;
        }
    }

    fn expand_paths(&mut self) {
        let paths = &mut self.paths;
        for path in [
            &mut paths.working_dir,
            &mut paths.crash_dumps_dir,
            &mut paths.output_dir,
            &mut paths.watermark_file,
            &mut paths.state_dir,
        ] {
            *path = expand_env_path(path);
        }
    }

    /// Reject configurations the monitor cannot run safely with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.process_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "monitor.process_name must not be empty".to_string(),
            ));
        }
        if self.monitor.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "monitor.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.recorder.command.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "recorder.command must not be empty".to_string(),
            ));
        }
        if self.archive.finalized_suffixes.is_empty()
            || self.archive.finalized_suffixes.iter().any(|s| s.is_empty())
        {
            return Err(ConfigError::Invalid(
                "archive.finalized_suffixes must list at least one non-empty suffix".to_string(),
            ));
        }
        // Purge deletes every file under the working directory each cycle.
        let working_dir = normalized(&self.paths.working_dir);
        for (key, path) in [
            ("paths.output_dir", &self.paths.output_dir),
            ("paths.watermark_file", &self.paths.watermark_file),
            ("paths.state_dir", &self.paths.state_dir),
        ] {
            if normalized(path).starts_with(&working_dir) {
                return Err(ConfigError::Invalid(format!(
                    "{key} ({}) must not be inside paths.working_dir ({})",
                    path.display(),
                    self.paths.working_dir.display()
                )));
            }
        }
        Ok(())
    }
}

/// Absolute, lexically normalized form of `path` for containment checks.
///
/// `.` and `..` are resolved without touching the filesystem, so paths that
/// do not exist yet compare correctly. Case is folded on Windows.
fn normalized(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    if cfg!(windows) {
        PathBuf::from(out.to_string_lossy().to_lowercase())
    } else {
        out
    }
}

static ENV_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"%([A-Za-z_][A-Za-z0-9_()]*)%|\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .unwrap()
});

/// Expand `%VAR%` and `${VAR}` references. Unknown variables are left verbatim.
pub fn expand_env(input: &str) -> String {
    ENV_REF
        .replace_all(input, |caps: &regex::Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

fn expand_env_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(expand_env(s)),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_ttd_setup() {
        let config = Config::default();
        assert_eq!(config.monitor.process_name, "myprocess.exe");
        assert_eq!(config.monitor.poll_interval_secs, 10);
        assert_eq!(config.monitor.flush_grace_secs, 10);
        assert_eq!(config.recorder.command, "ttd.exe");
        assert_eq!(
            config.recorder.args,
            vec!["-out", "{out}", "-monitor", "{process}"]
        );
        assert_eq!(config.archive.finalized_suffixes, vec![".out", ".run"]);
        assert!(config.dumps.configure);
        assert_eq!(config.dumps.dump_type, DumpType::Full);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
[monitor]
process_name = "game.exe"

[dumps]
dump_type = "mini"
"#,
        )
        .unwrap();
        assert_eq!(config.monitor.process_name, "game.exe");
        assert_eq!(config.monitor.poll_interval_secs, 10);
        assert_eq!(config.dumps.dump_type, DumpType::Mini);
        assert!(config.dumps.configure);
        assert_eq!(config.recorder.command, "ttd.exe");
    }

    #[test]
    fn test_dump_type_registry_values() {
        assert_eq!(DumpType::Custom.registry_value(), 0);
        assert_eq!(DumpType::Mini.registry_value(), 1);
        assert_eq!(DumpType::Full.registry_value(), 2);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.toml"), Overrides::default()).unwrap();
        assert_eq!(config.monitor.process_name, "myprocess.exe");
    }

    #[test]
    fn test_load_invalid_toml_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("crashtrace.toml");
        std::fs::write(&path, "[monitor\nprocess_name = ").unwrap();
        let err = Config::load(&path, Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("crashtrace.toml");
        std::fs::write(
            &path,
            "[monitor]\nprocess_name = \"from-file.exe\"\npoll_interval_secs = 30\n",
        )
        .unwrap();

        let overrides = Overrides {
            process_name: Some("from-cli.exe".to_string()),
            poll_interval_secs: Some(3),
            output_dir: Some(dir.path().join("archive")),
            ..Default::default()
        };
        let config = Config::load(&path, overrides).unwrap();
        assert_eq!(config.monitor.process_name, "from-cli.exe");
        assert_eq!(config.monitor.poll_interval_secs, 3);
        assert_eq!(config.paths.output_dir, dir.path().join("archive"));
    }

    #[test]
    fn test_validate_rejects_empty_process_name() {
        let mut config = Config::default();
        config.monitor.process_name = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval() {
        let mut config = Config::default();
        config.monitor.poll_interval_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("poll_interval_secs"));
    }

    #[test]
    fn test_validate_rejects_output_inside_working_dir() {
        let mut config = Config::default();
        config.paths.working_dir = PathBuf::from("/traces");
        config.paths.output_dir = PathBuf::from("/traces/kept");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must not be inside"));

        config.paths.output_dir = PathBuf::from("/traces");
        assert!(config.validate().is_err());

        config.paths.output_dir = PathBuf::from("/traces-kept");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_watermark_inside_working_dir() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.paths.working_dir = dir.path().join("temp_ttd_traces");
        config.paths.output_dir = dir.path().join("final_ttd_traces");
        config.paths.state_dir = dir.path().join(".crashtrace");
        config.paths.watermark_file = dir
            .path()
            .join("temp_ttd_traces")
            .join("last_dump_timestamp.txt");

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("paths.watermark_file"));

        config.paths.watermark_file = dir.path().join("last_dump_timestamp.txt");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_state_dir_inside_working_dir() {
        let mut config = Config::default();
        config.paths.working_dir = PathBuf::from("/traces");
        config.paths.output_dir = PathBuf::from("/final");
        config.paths.watermark_file = PathBuf::from("/var/last_dump_timestamp.txt");
        config.paths.state_dir = PathBuf::from("/traces/.crashtrace");

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("paths.state_dir"));
    }

    #[test]
    fn test_load_rejects_watermark_inside_working_dir() {
        let dir = tempdir().unwrap();
        let work = dir.path().join("work");
        let path = dir.path().join("crashtrace.toml");
        std::fs::write(
            &path,
            format!(
                "[paths]\nworking_dir = {:?}\noutput_dir = {:?}\nwatermark_file = {:?}\nstate_dir = {:?}\n",
                work.display().to_string(),
                dir.path().join("out").display().to_string(),
                work.join("last_dump_timestamp.txt").display().to_string(),
                dir.path().join("state").display().to_string(),
            ),
        )
        .unwrap();

        let err = Config::load(&path, Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_validate_compares_normalized_paths() {
        let mut config = Config::default();
        config.paths.working_dir = PathBuf::from("traces");
        config.paths.output_dir = PathBuf::from("./traces/kept");
        assert!(config.validate().is_err());

        config.paths.output_dir = PathBuf::from("other/../traces/kept");
        assert!(config.validate().is_err());

        let cwd = std::env::current_dir().unwrap();
        config.paths.output_dir = cwd.join("traces").join("kept");
        assert!(config.validate().is_err());

        config.paths.working_dir = cwd.join("traces");
        config.paths.output_dir = PathBuf::from("traces/./kept");
        assert!(config.validate().is_err());

        config.paths.output_dir = PathBuf::from("./traces-kept");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_normalized_resolves_dot_components() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(normalized(Path::new("./a/b/../c")), normalized(&cwd.join("a").join("c")));
        assert_eq!(normalized(Path::new("a/./b")), normalized(&cwd.join("a/b")));
    }

    #[test]
    fn test_validate_rejects_empty_suffix_list() {
        let mut config = Config::default();
        config.archive.finalized_suffixes.clear();
        assert!(config.validate().is_err());
        config.archive.finalized_suffixes = vec![String::new()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_env_percent_and_brace_forms() {
        std::env::set_var("CRASHTRACE_TEST_ROOT", "/data");
        assert_eq!(expand_env("%CRASHTRACE_TEST_ROOT%/dumps"), "/data/dumps");
        assert_eq!(expand_env("${CRASHTRACE_TEST_ROOT}/dumps"), "/data/dumps");
        assert_eq!(expand_env("plain/path"), "plain/path");
    }

    #[test]
    fn test_expand_env_unknown_variable_left_verbatim() {
        assert_eq!(
            expand_env("%CRASHTRACE_DEFINITELY_UNSET%/x"),
            "%CRASHTRACE_DEFINITELY_UNSET%/x"
        );
        assert_eq!(
            expand_env("${CRASHTRACE_DEFINITELY_UNSET}"),
            "${CRASHTRACE_DEFINITELY_UNSET}"
        );
    }
}
