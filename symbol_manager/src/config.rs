use std::path::PathBuf;
use std::time::Duration;

/// An external program that fetches a debug file from a symbol
/// server.
///
/// Each argument may contain the placeholders `{image}` (file name of
/// the image), `{build_id}` (hex GNU build id of the image) and
/// `{dest}` (path the debug file must be written to).  The download
/// counts as successful only if the program exits with status zero,
/// prints `success_sentinel` as a line of its standard output, and
/// the destination file exists afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTool {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub success_sentinel: String,
}

impl DownloadTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            success_sentinel: "SUCCESS".to_string(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn success_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.success_sentinel = sentinel.into();
        self
    }

    pub(crate) fn uses_build_id(&self) -> bool {
        self.args.iter().any(|arg| arg.contains("{build_id}"))
    }

    pub(crate) fn expand_args(
        &self,
        image: &str,
        build_id: &str,
        dest: &str,
    ) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{image}", image)
                    .replace("{build_id}", build_id)
                    .replace("{dest}", dest)
            })
            .collect()
    }
}

/// Where symbol offsets are cached, and where debug files are
/// looked for.
#[derive(Debug, Clone)]
pub struct SymbolConfig {
    /// Directory holding one offset cache file per image.
    pub cache_dir: PathBuf,

    /// Directories searched for `<image>.dbg` and `<image>.debug`.
    /// The image's own directory is always searched after these.
    pub search_paths: Vec<PathBuf>,

    /// Whether to search the current working directory after the
    /// search paths.
    pub search_cwd: bool,

    /// Program used to fetch debug files that are not found locally.
    pub download: Option<DownloadTool>,

    /// Download every file twice and compare the two copies.
    pub verify_downloads: bool,

    /// Wall-clock budget for one run of the download program.
    pub download_timeout: Duration,
}

impl Default for SymbolConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir(),
            search_paths: vec!["/usr/lib/debug".into()],
            search_cwd: true,
            download: None,
            verify_downloads: false,
            download_timeout: Duration::from_secs(90),
        }
    }
}

impl SymbolConfig {
    pub const CACHE_DIR_VAR: &'static str = "CLR_INSPECT_SYMBOL_CACHE_DIR";
    pub const SEARCH_PATH_VAR: &'static str = "CLR_INSPECT_SYMBOL_PATH";
    pub const NO_CWD_VAR: &'static str = "CLR_INSPECT_NO_CWD_SYMBOLS";
    pub const VERIFY_VAR: &'static str = "CLR_INSPECT_VERIFY_DOWNLOADS";

    /// Defaults, overridden by any of the `CLR_INSPECT_*` environment
    /// variables that are set.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dir) = std::env::var_os(Self::CACHE_DIR_VAR) {
            config.cache_dir = dir.into();
        }
        if let Some(paths) = std::env::var_os(Self::SEARCH_PATH_VAR) {
            config.search_paths = std::env::split_paths(&paths)
                .filter(|path| !path.as_os_str().is_empty())
                .collect();
        }
        if env_var_flag(Self::NO_CWD_VAR) {
            config.search_cwd = false;
        }
        if env_var_flag(Self::VERIFY_VAR) {
            config.verify_downloads = true;
        }

        config
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_search_paths(
        mut self,
        paths: impl IntoIterator<Item = impl Into<PathBuf>>,
    ) -> Self {
        self.search_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_download(mut self, tool: DownloadTool) -> Self {
        self.download = Some(tool);
        self
    }
}

fn env_var_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|var| parse_flag(&var))
        .unwrap_or(false)
}

fn parse_flag(var: &str) -> bool {
    if var.is_empty() {
        false
    } else if var.eq_ignore_ascii_case("true") {
        true
    } else if let Ok(value) = var.parse::<usize>() {
        value > 0
    } else {
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flag_values() {
        assert!(!parse_flag(""));
        assert!(parse_flag("true"));
        assert!(parse_flag("TRUE"));
        assert!(parse_flag("1"));
        assert!(parse_flag("42"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("yes"));
    }

    #[test]
    fn placeholder_expansion() {
        let tool = DownloadTool::new("dotnet-symbol")
            .arg("--output={dest}")
            .arg("{image}")
            .arg("--id={build_id}");
        assert!(tool.uses_build_id());
        assert_eq!(
            tool.expand_args("libcoreclr.so", "abcd", "/tmp/x.dbg"),
            vec!["--output=/tmp/x.dbg", "libcoreclr.so", "--id=abcd"]
        );
    }
}
