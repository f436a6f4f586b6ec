//! Interactive command prompt.
//!
//! Commands:
//! - `test`: prompt for kp, ki, kd, setpoint and mode, then run a test. Blank answers keep
//!   the previous value. Ctrl-C cancels the running test.
//! - `show [index]`: step-response table of every recorded test, or details of one
//! - `list`: recorded tests
//! - `remove [index]`: drop a recorded test
//! - `clear`: drop every recorded test
//! - `ping`: check that the controller answers
//! - `help`, `exit`
//!
//! The console runs on the command task: while a test runs, the prompt is not shown
//! again until the test completes, times out, or is cancelled.

use crate::config::TestDefaults;
use crate::error::{BenchError, BenchResult};
use crate::report;
use crate::session::SessionController;
use crate::validation::{parse_index, parse_mode, parse_number};
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::warn;

const HELP: &str = "\
Commands:
  test            run a test (blank answers keep the previous value)
  show [index]    compare recorded tests, or detail one
  list            list recorded tests
  remove [index]  remove a recorded test
  clear           remove every recorded test
  ping            check that the controller answers
  help            this text
  exit            quit";

/// What the prompt loop does after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Prompt for the next command.
    Continue,
    /// Leave the loop.
    Exit,
}

/// Prompt loop reading commands from `R` and writing to `W`.
pub struct Console<R, W> {
    controller: Arc<SessionController>,
    input: Lines<R>,
    out: W,
    defaults: TestDefaults,
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    /// Create a console driving `controller`.
    pub fn new(controller: Arc<SessionController>, input: R, out: W, defaults: TestDefaults) -> Self {
        Self {
            controller,
            input: input.lines(),
            out,
            defaults,
        }
    }

    /// Values offered at the next `test` prompt.
    pub fn defaults(&self) -> TestDefaults {
        self.defaults
    }

    /// Run until `exit` or end of input. Command errors are printed, never returned.
    pub async fn run(&mut self) -> BenchResult<()> {
        writeln!(self.out, "Type 'help' for the list of commands.")?;
        loop {
            let Some(command) = self.prompt("Enter a command: ").await? else {
                break;
            };
            match self.execute(command.trim()).await {
                Ok(Flow::Exit) => break,
                Ok(Flow::Continue) => {}
                Err(e) if e.is_operator_error() => writeln!(self.out, "{e}")?,
                Err(e) => {
                    warn!(command = command.trim(), error = %e, "Command failed");
                    writeln!(self.out, "{e}")?
                }
            }
        }
        Ok(())
    }

    /// Execute one command line.
    pub async fn execute(&mut self, line: &str) -> BenchResult<Flow> {
        let (command, argument) = match line.split_once(char::is_whitespace) {
            Some((command, argument)) => (command, Some(argument.trim())),
            None => (line, None),
        };

        match command {
            "" => {}
            "test" => self.test().await?,
            "show" => self.show(argument)?,
            "list" => self.list()?,
            "remove" => self.remove(argument).await?,
            "clear" => {
                let removed = self.controller.clear();
                writeln!(self.out, "Removed {removed} test(s)")?;
            }
            "ping" => self.controller.ping().await?,
            "help" => writeln!(self.out, "{HELP}")?,
            "exit" | "quit" => return Ok(Flow::Exit),
            other => {
                return Err(BenchError::InvalidInput(format!(
                    "unknown command '{other}' (type 'help')"
                )))
            }
        }
        Ok(Flow::Continue)
    }

    async fn test(&mut self) -> BenchResult<()> {
        let d = self.defaults;
        let kp = self.ask(&format!("Enter kp (default {}): ", d.kp)).await?;
        let ki = self.ask(&format!("Enter ki (default {}): ", d.ki)).await?;
        let kd = self.ask(&format!("Enter kd (default {}): ", d.kd)).await?;
        let setpoint = self
            .ask(&format!("Enter consigne (default {}): ", d.setpoint))
            .await?;
        let mode = self
            .ask(&format!("Enter mode v/p (default {}): ", d.mode))
            .await?;

        let defaults = TestDefaults {
            kp: parse_number("kp", &kp, d.kp)?,
            ki: parse_number("ki", &ki, d.ki)?,
            kd: parse_number("kd", &kd, d.kd)?,
            setpoint: parse_number("consigne", &setpoint, d.setpoint)?,
            mode: parse_mode(&mode, d.mode)?,
        };
        self.defaults = defaults;

        let controller = self.controller.clone();
        let started = Instant::now();
        let run = controller.request_test(
            defaults.mode,
            defaults.gains(),
            defaults.setpoint,
        );
        tokio::pin!(run);

        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                _ = tokio::signal::ctrl_c() => {
                    if controller.cancel_active() {
                        writeln!(self.out, "Cancelling test...")?;
                    }
                }
            }
        };

        let session = result?;
        writeln!(
            self.out,
            "Test #{} took {:.2} seconds ({} samples)",
            session.id(),
            started.elapsed().as_secs_f64(),
            session.len()
        )?;
        Ok(())
    }

    fn show(&mut self, argument: Option<&str>) -> BenchResult<()> {
        if let Some(argument) = argument.filter(|a| !a.is_empty()) {
            let session = self.controller.get(parse_index(argument)?)?;
            write!(self.out, "{}", report::render_detail(&session))?;
            return Ok(());
        }

        let sessions = self.controller.list();
        if sessions.is_empty() {
            writeln!(self.out, "No tests recorded")?;
            return Ok(());
        }
        let table = report::render(sessions.iter().enumerate().map(|(i, s)| (i, s.as_ref())));
        write!(self.out, "{table}")?;
        Ok(())
    }

    fn list(&mut self) -> BenchResult<()> {
        if let Some(active) = self.controller.active() {
            writeln!(self.out, "running: {active}")?;
        }
        for (index, session) in self.controller.list().iter().enumerate() {
            writeln!(self.out, "{index} {session} {}", report::timing(session))?;
        }
        Ok(())
    }

    async fn remove(&mut self, argument: Option<&str>) -> BenchResult<()> {
        let index = match argument.filter(|a| !a.is_empty()) {
            Some(argument) => argument.to_string(),
            None => self.ask("Enter index of test to remove: ").await?,
        };
        let removed = self.controller.remove(parse_index(&index)?)?;
        writeln!(self.out, "Removed {removed}")?;
        Ok(())
    }

    async fn prompt(&mut self, text: &str) -> BenchResult<Option<String>> {
        write!(self.out, "{text}")?;
        self.out.flush()?;
        Ok(self.input.next_line().await?)
    }

    /// Prompt for a value; end of input reads as a blank answer.
    async fn ask(&mut self, text: &str) -> BenchResult<String> {
        Ok(self.prompt(text).await?.unwrap_or_default())
    }
}
