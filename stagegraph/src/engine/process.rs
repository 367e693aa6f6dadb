//! Compute engine backed by an external program.
//!
//! The program receives one JSON request on stdin:
//!
//! ```json
//! {"pipeline": {...}, "samples": {"shape": [28, 28, 1], "count": 100,
//!  "features": [...], "labels": [...]}, "policy": {...}}
//! ```
//!
//! and must print a [`TrainingOutcome`] as JSON on stdout.

use super::{ComputeEngine, SampleData, TrainingOutcome};
use crate::config::TrainingPolicy;
use crate::errors::ExecutionError;
use crate::graph::CompiledPipeline;
use regex::Regex;
use serde_json::json;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use tracing::{debug, info};

const STDERR_EXCERPT_CHARS: usize = 400;

/// Runs training in a child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEngine {
    program: String,
    args: Vec<String>,
}

impl ProcessEngine {
    /// Creates an engine for a program.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Returns the program.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    fn request(
        pipeline: &CompiledPipeline,
        samples: &SampleData,
        policy: &TrainingPolicy,
    ) -> Result<Vec<u8>, ExecutionError> {
        let body = json!({
            "pipeline": pipeline,
            "samples": {
                "shape": samples.shape,
                "count": samples.count,
                "num_classes": samples.num_classes,
                "features": samples.features,
                "labels": samples.encoded_labels(policy.label_encoding),
            },
            "policy": policy,
        });
        serde_json::to_vec(&body).map_err(|e| ExecutionError::Protocol(e.to_string()))
    }
}

impl ComputeEngine for ProcessEngine {
    fn name(&self) -> String {
        format!("process:{}", self.program)
    }

    fn train(
        &self,
        pipeline: &CompiledPipeline,
        samples: &SampleData,
        policy: &TrainingPolicy,
    ) -> Result<TrainingOutcome, ExecutionError> {
        let request = Self::request(pipeline, samples, policy)?;
        info!(program = %self.program, loss = %policy.loss, epochs = policy.epochs, "Starting engine process");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                IoErrorKind::NotFound => {
                    ExecutionError::Unavailable(format!("engine program '{}' not found", self.program))
                }
                _ => ExecutionError::EngineFailed(format!("cannot start '{}': {e}", self.program)),
            })?;

        // Feed stdin from a separate thread so a chatty child cannot fill its
        // stdout pipe while we are still writing.
        let stdin = child.stdin.take();
        let writer = std::thread::spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&request)?;
            }
            Ok(())
        });

        let output = child
            .wait_with_output()
            .map_err(|e| ExecutionError::EngineFailed(format!("engine process lost: {e}")))?;
        match writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Engine closed stdin early"),
            Err(_) => debug!("Engine stdin writer panicked"),
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(classify_failure(&stderr, output.status.code()));
        }

        serde_json::from_slice::<TrainingOutcome>(&output.stdout)
            .map_err(|e| ExecutionError::Protocol(format!("unreadable engine output: {e}")))
    }
}

/// Maps a failed run's stderr to an execution error.
pub(crate) fn classify_failure(stderr: &str, code: Option<i32>) -> ExecutionError {
    let lower = stderr.to_ascii_lowercase();
    let excerpt = excerpt(stderr, code);
    if exhaustion_pattern().is_match(stderr) {
        ExecutionError::ResourceExhausted(excerpt)
    } else if lower.contains("loss") || lower.contains("label") {
        ExecutionError::ConfigIncompatible(excerpt)
    } else {
        ExecutionError::EngineFailed(excerpt)
    }
}

fn exhaustion_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\boom\b|out[ _]?of[ _]?memory|resource_?exhausted|memoryerror")
            .unwrap_or_else(|_| unreachable!())
    })
}

fn excerpt(stderr: &str, code: Option<i32>) -> String {
    let status = code.map_or_else(|| "killed by signal".to_string(), |c| format!("exit code {c}"));
    let last = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty());
    match last {
        Some(line) => {
            let line: String = line.chars().take(STDERR_EXCERPT_CHARS).collect();
            format!("{status}: {line}")
        }
        None => status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure("Traceback...\nValueError: Shapes (32, 1) and (32, 10) are incompatible in loss", Some(1)),
            ExecutionError::ConfigIncompatible(_)
        ));
        assert!(matches!(
            classify_failure("ResourceExhaustedError: OOM when allocating tensor", Some(1)),
            ExecutionError::ResourceExhausted(_)
        ));
        assert!(matches!(
            classify_failure("segfault", None),
            ExecutionError::EngineFailed(_)
        ));
    }

    #[test]
    fn test_memory_needles_match_whole_words() {
        for stderr in [
            "Killed: OOM",
            "oom-killer invoked",
            "CUDA_ERROR_OUT_OF_MEMORY",
            "java.lang.OutOfMemoryError",
            "MemoryError",
        ] {
            assert!(
                matches!(classify_failure(stderr, Some(1)), ExecutionError::ResourceExhausted(_)),
                "{stderr}"
            );
        }
        for stderr in ["no room left in staging area", "zoom factor invalid", "bloom filter corrupt"] {
            assert!(
                matches!(classify_failure(stderr, Some(1)), ExecutionError::EngineFailed(_)),
                "{stderr}"
            );
        }
    }

    #[test]
    fn test_excerpt_uses_last_line() {
        let err = classify_failure("first\nsecond\n\n", Some(3));
        assert_eq!(err, ExecutionError::EngineFailed("exit code 3: second".into()));
        assert_eq!(
            classify_failure("", None),
            ExecutionError::EngineFailed("killed by signal".into())
        );
    }

    #[test]
    fn test_missing_program_is_unavailable() {
        let engine = ProcessEngine::new("stagegraph-engine-that-does-not-exist");
        let pipeline = crate::graph::GraphCompiler::default()
            .compile(
                &[crate::graph::Node::new("dense", 0)],
                &[],
                &mut crate::context::RunContext::new(),
            )
            .unwrap();
        let samples =
            SampleData::synthesize(pipeline.input_shape(), 2, 10, 1, usize::MAX).unwrap();

        let err = engine
            .train(&pipeline, &samples, &TrainingPolicy::default())
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Unavailable(_)));
        assert!(!err.permits_reduced_retry());
    }

    #[cfg(unix)]
    #[test]
    fn test_process_round_trip() {
        let engine = ProcessEngine::new("sh").with_args([
            "-c",
            r#"cat > /dev/null; echo '{"metrics": {"loss": [0.9, 0.5]}, "graph": null}'"#,
        ]);
        let pipeline = crate::graph::GraphCompiler::default()
            .compile(
                &[crate::graph::Node::new("flatten", 0)],
                &[],
                &mut crate::context::RunContext::new(),
            )
            .unwrap();
        let samples =
            SampleData::synthesize(pipeline.input_shape(), 3, 10, 1, usize::MAX).unwrap();

        let outcome = engine
            .train(&pipeline, &samples, &TrainingPolicy::default())
            .unwrap();
        assert_eq!(outcome.metrics["loss"], vec![0.9, 0.5]);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_failures() {
        let pipeline = crate::graph::GraphCompiler::default()
            .compile(
                &[crate::graph::Node::new("flatten", 0)],
                &[],
                &mut crate::context::RunContext::new(),
            )
            .unwrap();
        let samples =
            SampleData::synthesize(pipeline.input_shape(), 1, 10, 1, usize::MAX).unwrap();
        let policy = TrainingPolicy::default();

        let garbage = ProcessEngine::new("sh").with_args(["-c", "cat > /dev/null; echo not-json"]);
        assert!(matches!(
            garbage.train(&pipeline, &samples, &policy),
            Err(ExecutionError::Protocol(_))
        ));

        let mismatch = ProcessEngine::new("sh")
            .with_args(["-c", "cat > /dev/null; echo 'label encoding does not match loss' >&2; exit 1"]);
        assert!(matches!(
            mismatch.train(&pipeline, &samples, &policy),
            Err(ExecutionError::ConfigIncompatible(_))
        ));
    }
}
