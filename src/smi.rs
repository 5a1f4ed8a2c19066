use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SmiError {
    #[error("failed to start {executable}: {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed waiting for {executable}: {source}")]
    Wait {
        executable: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{executable} did not finish within {timeout:?}")]
    Timeout { executable: String, timeout: Duration },
    #[error("{executable} exited with {status}: {stderr}")]
    Failed {
        executable: String,
        status: String,
        stderr: String,
        /// Whatever the tool printed before failing.
        stdout: Vec<u8>,
    },
}

/// Something that produces nvidia-smi style CSV for a scrape.
pub trait TelemetrySource: Send + Sync {
    fn query(&self) -> Result<Vec<u8>, SmiError>;

    fn describe(&self) -> String;
}

/// Arguments asking nvidia-smi for one headerless CSV row per GPU.
pub fn query_args<S: AsRef<str>>(fields: impl IntoIterator<Item = S>) -> Vec<String> {
    let mut query = String::from("--query-gpu=name,index");
    for field in fields {
        query.push(',');
        query.push_str(field.as_ref());
    }
    vec![query, "--format=csv,noheader,nounits".to_string()]
}

/// Resolves a bare executable name against `PATH`, leaving paths untouched.
pub fn resolve_executable(executable: &str) -> PathBuf {
    if executable.contains(std::path::MAIN_SEPARATOR) {
        return PathBuf::from(executable);
    }
    which::which(executable).unwrap_or_else(|_| PathBuf::from(executable))
}

/// Runs nvidia-smi once per scrape, killing it when it overruns the timeout.
#[derive(Debug, Clone)]
pub struct SmiCommand {
    executable: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl SmiCommand {
    pub fn new<S: AsRef<str>>(
        executable: &str,
        fields: impl IntoIterator<Item = S>,
        timeout: Duration,
    ) -> Self {
        Self {
            executable: resolve_executable(executable),
            args: query_args(fields),
            timeout,
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn name(&self) -> String {
        self.executable.display().to_string()
    }
}

impl TelemetrySource for SmiCommand {
    fn query(&self) -> Result<Vec<u8>, SmiError> {
        let mut child = Command::new(&self.executable)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SmiError::Spawn {
                executable: self.name(),
                source,
            })?;

        let stdout = spawn_reader(child.stdout.take().map(|s| Box::new(s) as Box<dyn Read + Send>));
        let stderr = spawn_reader(child.stderr.take().map(|s| Box::new(s) as Box<dyn Read + Send>));

        let status = match wait_with_timeout(&mut child, self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SmiError::Timeout {
                    executable: self.name(),
                    timeout: self.timeout,
                });
            }
            Err(source) => {
                let _ = child.kill();
                return Err(SmiError::Wait {
                    executable: self.name(),
                    source,
                });
            }
        };

        let out = stdout.recv().unwrap_or_default();
        let err = stderr.recv().unwrap_or_default();
        if status.success() {
            Ok(out)
        } else {
            Err(SmiError::Failed {
                executable: self.name(),
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&err).trim().to_string(),
                stdout: out,
            })
        }
    }

    fn describe(&self) -> String {
        format!("{} {}", self.name(), self.args.join(" "))
    }
}

fn spawn_reader(pipe: Option<Box<dyn Read + Send>>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}

fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    let step = Duration::from_millis(20);
    let mut waited = Duration::ZERO;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if waited >= timeout {
            return Ok(None);
        }
        thread::sleep(step);
        waited += step;
    }
}

/// Fixed output, for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    output: Vec<u8>,
}

impl StaticSource {
    pub fn new(output: impl Into<Vec<u8>>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

impl TelemetrySource for StaticSource {
    fn query(&self) -> Result<Vec<u8>, SmiError> {
        Ok(self.output.clone())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}
