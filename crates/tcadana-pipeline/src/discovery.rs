//! Run discovery and fingerprinting.
//!
//! Runs live at `<root>/<device>/<variant>/<index>/`, where `<index>` is a
//! non-negative integer. Every regular, non-hidden file below a run directory
//! is a candidate source; its format comes from the extension overrides or
//! from header sniffing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use tcadana_core::{FingerprintBuilder, RunId, SimulationRun, SourceFile};

use crate::config::{FingerprintMode, PipelineConfig};
use crate::error::{Error, Result};

/// A file left out of a run, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub relative_path: String,
    pub reason: String,
}

/// A discovered run that has not been fingerprinted yet.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub id: RunId,
    pub root: PathBuf,
    pub sources: Vec<SourceFile>,
    pub skipped: Vec<SkippedFile>,
}

impl RunSpec {
    /// Scan `dir` as the run `id`.
    pub fn from_dir(id: RunId, dir: impl Into<PathBuf>, config: &PipelineConfig) -> Result<Self> {
        let root = dir.into();
        let mut files = Vec::new();
        collect_files(&root, &mut files)?;
        files.sort();

        let mut sources = Vec::new();
        let mut skipped = Vec::new();
        for path in files {
            let relative_path = path.strip_prefix(&root).unwrap_or(&path).to_path_buf();
            let rel = relative_path.to_string_lossy().replace('\\', "/");

            let format = match config.format_override(&path) {
                Some(tag) => tag,
                None => match tcadana_parser::sniff_file(&path) {
                    Ok(tag) => tag,
                    Err(e) if e.is_unsupported() => {
                        log::debug!("{}: skipping {}: {}", id, rel, e);
                        skipped.push(SkippedFile {
                            relative_path: rel,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                },
            };
            if !tcadana_parser::supports(format) {
                skipped.push(SkippedFile {
                    relative_path: rel,
                    reason: format!("{} files are not supported by this build", format),
                });
                continue;
            }

            let meta = fs::metadata(&path).map_err(|e| Error::io(&path, e))?;
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .unwrap_or_default();
            sources.push(SourceFile {
                path,
                relative_path,
                size: meta.len(),
                modified_secs: modified.as_secs(),
                modified_nanos: modified.subsec_nanos(),
                format: Some(format),
            });
        }

        Ok(Self {
            id,
            root,
            sources,
            skipped,
        })
    }

    /// Compute the run fingerprint.
    pub fn fingerprint(&self, mode: FingerprintMode) -> Result<SimulationRun> {
        let mut builder = FingerprintBuilder::new();
        for source in &self.sources {
            match mode {
                FingerprintMode::Metadata => {
                    builder.add_metadata(source);
                }
                FingerprintMode::Content => {
                    let digest = content_digest(&source.path)?;
                    builder.add_content_digest(source, &digest);
                }
            }
        }
        Ok(SimulationRun::new(
            self.id.clone(),
            self.root.clone(),
            self.sources.clone(),
            builder.finish(),
        ))
    }
}

/// Find every run below `root`, in run-identity order.
pub fn discover_runs(root: &Path, config: &PipelineConfig) -> Result<Vec<RunSpec>> {
    let mut runs = Vec::new();
    for device in sorted_dirs(root)? {
        for variant in sorted_dirs(&device)? {
            for run_dir in sorted_dirs(&variant)? {
                let Some(id) = run_id_for(&device, &variant, &run_dir) else {
                    log::debug!("Ignoring {}: not a run directory", run_dir.display());
                    continue;
                };
                runs.push(RunSpec::from_dir(id, run_dir, config)?);
            }
        }
    }
    runs.sort_by(|a, b| a.id.cmp(&b.id));
    log::info!("Discovered {} runs under {}", runs.len(), root.display());
    Ok(runs)
}

fn run_id_for(device: &Path, variant: &Path, run_dir: &Path) -> Option<RunId> {
    let name = |p: &Path| p.file_name().and_then(|n| n.to_str()).map(str::to_string);
    let index = name(run_dir)?.parse::<u32>().ok()?;
    RunId::new(name(device)?, name(variant)?, index).ok()
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

fn sorted_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let path = entry.map_err(|e| Error::io(dir, e))?.path();
        if path.is_dir() && !is_hidden(&path) {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let path = entry.map_err(|e| Error::io(dir, e))?.path();
        if is_hidden(&path) {
            continue;
        }
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn content_digest(path: &Path) -> Result<[u8; 32]> {
    let mut file = fs::File::open(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher).map_err(|e| Error::io(path, e))?;
    Ok(*hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcadana_core::FormatTag;

    const GRID: &str = "# tcadgrid 1.0\nquantity ElectricField V/cm\ndimension 1\ndata\n0 1\n1 2\n";

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_discover_layout() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "devB/base/0/field.grd", GRID);
        write(dir.path(), "devA/split1/1/field.grd", GRID);
        write(dir.path(), "devA/split1/0/field.grd", GRID);
        write(dir.path(), "devA/split1/0/notes.txt", "hello");
        write(dir.path(), "devA/split1/0/.hidden", "x");
        write(dir.path(), "devA/split1/latest/field.grd", GRID);

        let runs = discover_runs(dir.path(), &PipelineConfig::default()).unwrap();
        let ids: Vec<String> = runs.iter().map(|r| r.id.to_string()).collect();
        assert_eq!(ids, vec!["devA/split1/0", "devA/split1/1", "devB/base/0"]);

        let first = &runs[0];
        assert_eq!(first.sources.len(), 1);
        assert_eq!(first.sources[0].format, Some(FormatTag::GridV1));
        assert_eq!(first.skipped.len(), 1);
        assert_eq!(first.skipped[0].relative_path, "notes.txt");
    }

    #[test]
    fn test_fingerprint_tracks_changes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "field.grd", GRID);
        let id = RunId::new("dev", "base", 0).unwrap();
        let config = PipelineConfig::default();

        for mode in [FingerprintMode::Metadata, FingerprintMode::Content] {
            let a = RunSpec::from_dir(id.clone(), dir.path(), &config).unwrap().fingerprint(mode).unwrap();
            let b = RunSpec::from_dir(id.clone(), dir.path(), &config).unwrap().fingerprint(mode).unwrap();
            assert_eq!(a.fingerprint, b.fingerprint);
        }

        let before = RunSpec::from_dir(id.clone(), dir.path(), &config)
            .unwrap()
            .fingerprint(FingerprintMode::Content)
            .unwrap();
        write(dir.path(), "field.grd", &GRID.replace("0 1", "0 3"));
        let after = RunSpec::from_dir(id, dir.path(), &config)
            .unwrap()
            .fingerprint(FingerprintMode::Content)
            .unwrap();
        assert_ne!(before.fingerprint, after.fingerprint);
    }

    #[test]
    fn test_extension_override() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.grd", GRID);
        let config = PipelineConfig::default().with_extension_format("grd", FormatTag::GridV2);
        let spec = RunSpec::from_dir(RunId::new("d", "v", 0).unwrap(), dir.path(), &config).unwrap();
        assert_eq!(spec.sources[0].format, Some(FormatTag::GridV2));
    }
}
