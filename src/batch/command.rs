use std::path::Path;
use std::process::Command;

use log::{info, warn};
use serde::Serialize;
use tinytemplate::TinyTemplate;

use crate::batch::status::parse_query_output;
use crate::batch::{BatchError, BatchScheduler, ExternalStatus};
use crate::flavour::SchedulerFlavour;

/// Runs the cluster's scheduler commands as child processes
///
/// Command lines are TinyTemplate templates. The submit template may use `{script}` and
/// `{job_dir}`, the query template `{handle}`. Rendered commands are split on whitespace, so
/// paths with spaces are not supported.
#[derive(Debug, Clone)]
pub struct CommandScheduler {
    flavour: SchedulerFlavour,
    submit_template: String,
    query_template: String,
}

/// Rendering context for submit and query commands
#[derive(Serialize)]
struct CommandContext {
    script: String,
    job_dir: String,
    handle: String,
}

impl CommandScheduler {
    pub fn new(flavour: SchedulerFlavour) -> CommandScheduler {
        CommandScheduler {
            flavour,
            submit_template: flavour.submit_template().to_string(),
            query_template: flavour.query_template().to_string(),
        }
    }

    pub fn with_templates(mut self, submit: Option<&str>, query: Option<&str>) -> CommandScheduler {
        if let Some(submit) = submit {
            self.submit_template = submit.to_string();
        }
        if let Some(query) = query {
            self.query_template = query.to_string();
        }
        self
    }

    pub fn flavour(&self) -> SchedulerFlavour {
        self.flavour
    }

    fn render(&self, template: &str, context: &CommandContext) -> Result<Vec<String>, BatchError> {
        let mut tt = TinyTemplate::new();
        tt.set_default_formatter(&tinytemplate::format_unescaped);
        let render_error = |source| BatchError::Template { template: template.to_string(), source };
        tt.add_template("command", template).map_err(render_error)?;
        let rendered = tt.render("command", context).map_err(render_error)?;

        let words: Vec<String> = rendered.split_whitespace().map(str::to_string).collect();
        if words.is_empty() {
            return Err(BatchError::EmptyCommand(template.to_string()));
        }
        Ok(words)
    }

    /// Run a rendered command and return its stdout, failing on a non-zero exit
    fn run(&self, words: &[String], current_dir: Option<&Path>) -> Result<String, BatchError> {
        let command_line = words.join(" ");
        let mut cmd = Command::new(&words[0]);
        cmd.args(&words[1..]);
        if let Some(dir) = current_dir {
            cmd.current_dir(dir);
        }
        info!("Running {:?}", &cmd);

        let output = cmd.output().map_err(|source| BatchError::Spawn {
            command: command_line.clone(),
            source,
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("{} failed: {}", command_line, stderr);
            return Err(BatchError::Rejected {
                command: command_line,
                code: output.status.code(),
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl BatchScheduler for CommandScheduler {
    fn submit(&self, script: &Path, job_dir: &Path) -> Result<String, BatchError> {
        let context = CommandContext {
            script: script.display().to_string(),
            job_dir: job_dir.display().to_string(),
            handle: String::new(),
        };
        let words = self.render(&self.submit_template, &context)?;
        let stdout = self.run(&words, Some(job_dir))?;

        // sbatch --parsable prints "jobid[;cluster]"
        let handle = stdout.trim().split(';').next().unwrap_or("").trim().to_string();
        if handle.is_empty() {
            return Err(BatchError::MalformedOutput { command: words.join(" "), output: stdout });
        }
        Ok(handle)
    }

    fn query(&self, handle: &str) -> Result<ExternalStatus, BatchError> {
        let context = CommandContext {
            script: String::new(),
            job_dir: String::new(),
            handle: handle.to_string(),
        };
        let words = self.render(&self.query_template, &context)?;
        let stdout = self.run(&words, None)?;
        parse_query_output(self.flavour, &stdout).ok_or_else(|| BatchError::MalformedOutput {
            command: words.join(" "),
            output: stdout,
        })
    }
}
