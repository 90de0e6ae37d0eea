use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::{DebugSymbolFile, DownloadTool, Error, Result, SymbolConfig};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Finds the file holding the symbol table of an image.
///
/// Locations are tried in order: each configured search path, the
/// image's own directory, the current working directory, the image
/// itself (if it was not stripped), and finally the configured
/// download tool.
pub struct SymbolLocator<'a> {
    config: &'a SymbolConfig,
}

impl<'a> SymbolLocator<'a> {
    pub fn new(config: &'a SymbolConfig) -> Self {
        Self { config }
    }

    /// Candidate locations for a separate debug file, in search
    /// order.  Not all of them need to exist.
    pub fn candidates(&self, image: &Path) -> Vec<PathBuf> {
        let Some(file_name) = image.file_name() else {
            return Vec::new();
        };

        let dirs = self
            .config
            .search_paths
            .iter()
            .cloned()
            .chain(image.parent().map(Path::to_path_buf))
            .chain(
                self.config
                    .search_cwd
                    .then(std::env::current_dir)
                    .and_then(|cwd| cwd.ok()),
            );

        dirs.flat_map(|dir| {
            [".dbg", ".debug"].map(|ext| {
                let mut name = file_name.to_os_string();
                name.push(ext);
                dir.join(name)
            })
        })
        .collect()
    }

    pub fn locate(&self, image: &Path) -> Result<PathBuf> {
        let candidates = self.candidates(image);
        if let Some(found) = candidates.iter().find(|path| path.is_file()) {
            log::info!(
                "Using debug symbols for {} from {}",
                image.display(),
                found.display()
            );
            return Ok(found.clone());
        }

        if image.is_file() && DebugSymbolFile::open(image)?.has_symtab()? {
            log::info!("Using symbol table of {} itself", image.display());
            return Ok(image.to_path_buf());
        }

        if let Some(tool) = &self.config.download {
            return self.download_verified(tool, image);
        }

        Err(Error::DebugSymbolsNotFound {
            image: image.display().to_string(),
            searched: candidates,
        })
    }

    fn download_verified(
        &self,
        tool: &DownloadTool,
        image: &Path,
    ) -> Result<PathBuf> {
        let dest = self.config.cache_dir.join("symbols");
        let downloaded = self.download(tool, image, &dest)?;

        if self.config.verify_downloads {
            let scratch = self.config.cache_dir.join("symbols-verify");
            let second = self.download(tool, image, &scratch)?;
            let identical = std::fs::read(&downloaded)? == std::fs::read(&second)?;
            std::fs::remove_file(&second)?;
            if !identical {
                return Err(Error::DownloadedSymbolMismatch {
                    image: image.display().to_string(),
                    first: downloaded,
                    second,
                });
            }
            log::debug!("Verified download of {}", downloaded.display());
        }

        Ok(downloaded)
    }

    /// Run the download tool once, placing the debug file in
    /// `dest_dir`.
    pub fn download(
        &self,
        tool: &DownloadTool,
        image: &Path,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let image_name = image
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::InvalidImageName(image.display().to_string()))?;
        let image_str = image.display().to_string();

        let build_id = if tool.uses_build_id() {
            DebugSymbolFile::open(image)?
                .build_id()?
                .ok_or_else(|| Error::MissingBuildId(image.to_path_buf()))?
        } else {
            String::new()
        };

        std::fs::create_dir_all(dest_dir)?;
        let dest = dest_dir.join(format!("{image_name}.dbg"));

        // Only a file written by this run may count as the download.
        match std::fs::remove_file(&dest) {
            Ok(()) => log::debug!("Removed previous {}", dest.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let args = tool.expand_args(
            image_name,
            &build_id,
            &dest.display().to_string(),
        );

        log::info!(
            "Downloading symbols for {image_str}: {} {}",
            tool.program.display(),
            args.join(" ")
        );

        let mut child = Command::new(&tool.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        // Drained on a separate thread, so that a chatty tool cannot
        // block on a full pipe while it is being polled.
        let stdout_reader = child.stdout.take().map(|mut stdout| {
            std::thread::spawn(move || {
                let mut text = String::new();
                stdout.read_to_string(&mut text).map(|_| text)
            })
        });

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if start.elapsed() > self.config.download_timeout {
                child.kill()?;
                child.wait()?;
                return Err(Error::DownloadTimeout {
                    image: image_str,
                    timeout: self.config.download_timeout,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let stdout = match stdout_reader {
            Some(handle) => handle.join().unwrap_or_else(|_| Ok(String::new()))?,
            None => String::new(),
        };

        let failure = if !status.success() {
            Some(format!("exited with {status}"))
        } else if !stdout
            .lines()
            .any(|line| line.trim() == tool.success_sentinel)
        {
            Some(format!(
                "output did not contain '{}'",
                tool.success_sentinel
            ))
        } else if !dest.is_file() {
            Some(format!("{} was not created", dest.display()))
        } else {
            None
        };

        match failure {
            Some(reason) => Err(Error::DownloadFailed {
                image: image_str,
                reason,
            }),
            None => Ok(dest),
        }
    }
}
