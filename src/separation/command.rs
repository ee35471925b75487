//! Engine backed by the `audio-separator` command-line tool
//!
//! Each call runs the tool as a child process. The child owns the
//! accelerator context, so its exit frees the model memory; `release` only
//! forgets which model was loaded.

use super::engine::{EngineFactory, EngineSpec, SeparationEngine};
use super::params::ModelFamily;
use crate::error::{Result, StudioError};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info};

/// Executable name looked up on PATH
pub const DEFAULT_PROGRAM: &str = "audio-separator";

/// Lines of stderr kept in error messages
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
enum CommandError {
    #[error("`{0}` not found on PATH")]
    Missing(String),

    #[error("`{command}` exited with status {status}: {stderr}")]
    Failed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Factory for [`CommandEngine`]
#[derive(Debug, Clone)]
pub struct CommandEngineFactory {
    program: String,
}

impl CommandEngineFactory {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for CommandEngineFactory {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl EngineFactory for CommandEngineFactory {
    fn create(&self, spec: EngineSpec) -> Result<Box<dyn SeparationEngine>> {
        if !self.is_available() {
            return Err(StudioError::EngineUnavailable {
                reason: format!("`{}` not found on PATH", self.program),
            });
        }
        Ok(Box::new(CommandEngine {
            program: self.program.clone(),
            spec,
            model_id: None,
        }))
    }

    fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    fn name(&self) -> &'static str {
        "audio-separator"
    }
}

/// One model session driven through the command-line tool
pub struct CommandEngine {
    program: String,
    spec: EngineSpec,
    model_id: Option<String>,
}

impl SeparationEngine for CommandEngine {
    fn load(&mut self, model_id: &str) -> Result<()> {
        let args = vec![
            "--download_model_only".to_string(),
            "--model_filename".to_string(),
            model_id.to_string(),
            "--model_file_dir".to_string(),
            self.spec.model_dir.display().to_string(),
            "--log_level".to_string(),
            "warning".to_string(),
        ];

        run_command(&self.program, &args).map_err(|e| match e {
            CommandError::Missing(program) => StudioError::EngineUnavailable {
                reason: format!("`{}` not found on PATH", program),
            },
            other => StudioError::ModelLoad {
                model_id: model_id.to_string(),
                reason: other.to_string(),
            },
        })?;

        debug!("Model {} available in {}", model_id, self.spec.model_dir.display());
        self.model_id = Some(model_id.to_string());
        Ok(())
    }

    fn separate(&mut self, input_path: &Path) -> Result<Vec<PathBuf>> {
        let model_id = self.model_id.clone().ok_or_else(|| StudioError::ModelLoad {
            model_id: "<none>".to_string(),
            reason: "separate called before load".to_string(),
        })?;

        let before = snapshot(&self.spec.output_dir, &self.spec.output_format);
        let started = SystemTime::now();
        let args = separate_args(&self.spec, &model_id, input_path);

        info!("Running {} with {}", self.program, model_id);
        run_command(&self.program, &args).map_err(|e| StudioError::separation(&model_id, e))?;

        Ok(written_since(
            &self.spec.output_dir,
            &self.spec.output_format,
            &before,
            started,
        ))
    }

    fn release(&mut self) {
        if let Some(model_id) = self.model_id.take() {
            debug!("Unloaded {}", model_id);
        }
    }
}

/// Arguments for one separation run
fn separate_args(spec: &EngineSpec, model_id: &str, input_path: &Path) -> Vec<String> {
    let p = &spec.params;
    let mut args = vec![
        input_path.display().to_string(),
        "--model_filename".to_string(),
        model_id.to_string(),
        "--model_file_dir".to_string(),
        spec.model_dir.display().to_string(),
        "--output_dir".to_string(),
        spec.output_dir.display().to_string(),
        "--output_format".to_string(),
        spec.output_format.to_uppercase(),
        "--log_level".to_string(),
        "warning".to_string(),
    ];

    let mut push = |flag: &str, value: String| {
        args.push(flag.to_string());
        args.push(value);
    };

    match spec.family {
        ModelFamily::Mdx => {
            push("--mdx_segment_size", p.segment_size.to_string());
            push("--mdx_overlap", p.overlap.to_string());
            push("--mdx_batch_size", p.batch_size.to_string());
        }
        ModelFamily::Mdxc => {
            push("--mdxc_segment_size", p.segment_size.to_string());
            push("--mdxc_overlap", (p.overlap.round() as u32).max(2).to_string());
            push("--mdxc_batch_size", p.batch_size.to_string());
        }
        ModelFamily::Vr => {
            push("--vr_batch_size", p.batch_size.to_string());
            push("--vr_window_size", p.segment_size.to_string());
            push("--vr_aggression", p.aggression.to_string());
            push("--vr_post_process_threshold", p.post_process_threshold.to_string());
        }
        ModelFamily::Demucs => {
            push("--demucs_segment_size", p.segment_size.to_string());
            push("--demucs_overlap", p.overlap.to_string());
        }
    }

    let flags: Vec<(bool, &str)> = match spec.family {
        ModelFamily::Mdx => vec![(p.enable_denoise, "--mdx_enable_denoise")],
        ModelFamily::Vr => vec![
            (p.enable_tta, "--vr_enable_tta"),
            (p.enable_post_process, "--vr_enable_post_process"),
            (p.high_end_process, "--vr_high_end_process"),
        ],
        ModelFamily::Mdxc | ModelFamily::Demucs => Vec::new(),
    };
    for (enabled, flag) in flags {
        if enabled {
            args.push(flag.to_string());
        }
    }
    if p.use_autocast {
        args.push("--use_autocast".to_string());
    }

    args
}

fn run_command(program: &str, args: &[String]) -> std::result::Result<Output, CommandError> {
    if which::which(program).is_err() {
        return Err(CommandError::Missing(program.to_string()));
    }

    let rendered = format!("{} {}", program, args.join(" "));
    debug!("Running: {}", rendered);

    let output = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|source| CommandError::Spawn {
            command: program.to_string(),
            source,
        })?;

    validate_output(&rendered, output)
}

fn validate_output(rendered: &str, output: Output) -> std::result::Result<Output, CommandError> {
    if output.status.success() {
        return Ok(output);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().collect();
    let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");

    Err(CommandError::Failed {
        command: rendered.to_string(),
        status: output.status.code().unwrap_or(-1),
        stderr: tail,
    })
}

fn list_outputs(dir: &Path, ext: &str) -> Vec<(PathBuf, Option<SystemTime>)> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case(ext))
        })
        .map(|path| {
            let modified = fs::metadata(&path).and_then(|m| m.modified()).ok();
            (path, modified)
        })
        .collect()
}

fn snapshot(dir: &Path, ext: &str) -> HashMap<PathBuf, Option<SystemTime>> {
    list_outputs(dir, ext).into_iter().collect()
}

/// Files created, or rewritten, since `before` was taken
fn written_since(
    dir: &Path,
    ext: &str,
    before: &HashMap<PathBuf, Option<SystemTime>>,
    started: SystemTime,
) -> Vec<PathBuf> {
    let mut written: Vec<PathBuf> = list_outputs(dir, ext)
        .into_iter()
        .filter(|(path, modified)| match before.get(path) {
            None => true,
            Some(previous) => {
                modified != previous || modified.is_some_and(|m| m >= started)
            }
        })
        .map(|(path, _)| path)
        .collect();
    written.sort();
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::separation::params::EngineParams;
    use std::time::Duration;
    use tempfile::TempDir;

    fn spec(family: ModelFamily) -> EngineSpec {
        EngineSpec {
            model_dir: PathBuf::from("/models"),
            output_dir: PathBuf::from("/out"),
            output_format: "wav".to_string(),
            family,
            params: EngineParams::for_family(family),
        }
    }

    #[test]
    fn test_mdx_args() {
        let args = separate_args(&spec(ModelFamily::Mdx), "UVR-MDX-NET-Voc_FT.onnx", Path::new("/in/song.wav"));
        assert_eq!(args[0], "/in/song.wav");
        let joined = args.join(" ");
        assert!(joined.contains("--model_filename UVR-MDX-NET-Voc_FT.onnx"));
        assert!(joined.contains("--output_format WAV"));
        assert!(joined.contains("--mdx_segment_size 256"));
        assert!(!joined.contains("--vr_"));
        assert!(!joined.contains("--mdx_enable_denoise"));
    }

    #[test]
    fn test_vr_flags() {
        let mut s = spec(ModelFamily::Vr);
        s.params.enable_tta = true;
        s.params.use_autocast = true;
        let joined = separate_args(&s, "5_HP-Karaoke-UVR.pth", Path::new("in.wav")).join(" ");
        assert!(joined.contains("--vr_window_size 512"));
        assert!(joined.contains("--vr_aggression 5"));
        assert!(joined.contains("--vr_enable_tta"));
        assert!(!joined.contains("--vr_high_end_process"));
        assert!(joined.ends_with("--use_autocast"));
    }

    #[test]
    fn test_mdxc_overlap_is_integer() {
        let joined = separate_args(&spec(ModelFamily::Mdxc), "m.ckpt", Path::new("in.wav")).join(" ");
        assert!(joined.contains("--mdxc_overlap 8"));
    }

    #[test]
    fn test_written_since() {
        let temp = TempDir::new().unwrap();
        let old = temp.path().join("old_(Vocals).wav");
        fs::write(&old, b"x").unwrap();

        let before = snapshot(temp.path(), "wav");
        let started = SystemTime::now() + Duration::from_secs(3600);
        let new = temp.path().join("new_(Vocals).wav");
        fs::write(&new, b"x").unwrap();
        fs::write(temp.path().join("log.txt"), b"x").unwrap();

        assert_eq!(written_since(temp.path(), "wav", &before, started), vec![new]);
    }

    #[test]
    fn test_failed_output_keeps_stderr_tail() {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            let output = Output {
                status: std::process::ExitStatus::from_raw(1 << 8),
                stdout: Vec::new(),
                stderr: b"loading\nCUDA out of memory".to_vec(),
            };
            let err = validate_output("audio-separator in.wav", output).unwrap_err();
            let text = err.to_string();
            assert!(text.contains("status 1"));
            assert!(text.contains("CUDA out of memory"));
        }
    }

    #[test]
    fn test_missing_program() {
        let factory = CommandEngineFactory::new("definitely-not-installed-separator-xyz");
        assert!(!factory.is_available());
        assert!(matches!(
            factory.create(spec(ModelFamily::Mdx)),
            Err(StudioError::EngineUnavailable { .. })
        ));
    }
}
