use crate::error::ShrinkResult;
use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The human gate between planning and execution
pub trait Confirmation {
    /// Show `summary` and return whether to proceed
    fn confirm(&mut self, summary: &str) -> ShrinkResult<bool>;
}

/// Asks on the terminal until the operator types `yes` or `no`
pub struct TerminalConfirmation<R: BufRead, W: Write> {
    input: R,
    output: W,
    /// Set while an answer is awaited
    waiting: Arc<AtomicBool>,
}

impl TerminalConfirmation<io::BufReader<io::Stdin>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalConfirmation<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            waiting: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that is set while the prompt blocks on input. An interrupt
    /// arriving while it is set answers the prompt with no.
    pub fn waiting_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.waiting)
    }

    fn read_answer(&mut self) -> ShrinkResult<bool> {
        loop {
            writeln!(self.output, "Do you want to proceed? Type yes or no")?;
            self.output.flush()?;
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                // End of input counts as a refusal
                return Ok(false);
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "yes" => return Ok(true),
                "no" => return Ok(false),
                _ => continue,
            }
        }
    }
}

impl<R: BufRead, W: Write> Confirmation for TerminalConfirmation<R, W> {
    fn confirm(&mut self, summary: &str) -> ShrinkResult<bool> {
        write!(self.output, "{}", summary)?;
        writeln!(
            self.output,
            "\n{}",
            "Make sure to check the list above and ensure there are no connections \
             to this database during this procedure!"
                .yellow()
        )?;
        self.waiting.store(true, Ordering::SeqCst);
        let answer = self.read_answer();
        self.waiting.store(false, Ordering::SeqCst);
        answer
    }
}

/// Fixed answer, for unattended use and tests
#[derive(Debug, Clone, Default)]
pub struct AutoConfirm {
    pub answer: bool,
    /// Every summary shown so far
    pub shown: Vec<String>,
}

impl AutoConfirm {
    pub fn yes() -> Self {
        Self {
            answer: true,
            shown: Vec::new(),
        }
    }

    pub fn no() -> Self {
        Self {
            answer: false,
            shown: Vec::new(),
        }
    }
}

impl Confirmation for AutoConfirm {
    fn confirm(&mut self, summary: &str) -> ShrinkResult<bool> {
        self.shown.push(summary.to_string());
        Ok(self.answer)
    }
}
