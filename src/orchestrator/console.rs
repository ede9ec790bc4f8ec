use colored::Colorize;
use std::io::{self, Write};

/// Operator-facing progress lines (`Doing something... OK`)
pub struct Console {
    out: Box<dyn Write + Send>,
}

impl Console {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Discards everything
    pub fn silent() -> Self {
        Self::new(Box::new(io::sink()))
    }

    pub fn begin(&mut self, action: &str) {
        let _ = write!(self.out, "{}... ", action);
        let _ = self.out.flush();
    }

    pub fn ok(&mut self) {
        let _ = writeln!(self.out, "{}", "OK".green());
    }

    pub fn failed(&mut self) {
        let _ = writeln!(self.out, "{}", "FAILED".red());
    }

    pub fn warn(&mut self, message: &str) {
        let _ = writeln!(self.out, "\n{}", message.yellow());
    }

    pub fn line(&mut self, message: &str) {
        let _ = writeln!(self.out, "{}", message);
    }
}
