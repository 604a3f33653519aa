//! Terminal decision source
//!
//! Prints each suggestion and reads one line:
//! - empty line accepts the suggestion
//! - `pass` skips it
//! - anything else is taken as an explicit spool id

use crate::reconcile::{Decision, DecisionSource, Proposal, SessionPhase};
use std::io::{BufRead, Write};
use tracing::warn;

pub struct ConsoleDecisionSource<R, W> {
    input: R,
    output: W,
}

impl ConsoleDecisionSource<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsoleDecisionSource<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn prompt(&mut self, proposal: &Proposal<'_>) -> std::io::Result<String> {
        let label = match proposal.phase {
            SessionPhase::Fallback => "Fallback match",
            _ => "Suggested match",
        };
        writeln!(
            self.output,
            "{}: '{}' -> '{}' (Spool ID: {})",
            label,
            proposal.source.composite_key(),
            proposal.target.composite_key(),
            proposal.target.id
        )?;
        write!(
            self.output,
            "Press Enter to accept, type a Spool ID, or 'pass' to skip: "
        )?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "end of input",
            ));
        }
        Ok(line.trim().to_string())
    }
}

impl<R: BufRead, W: Write> DecisionSource for ConsoleDecisionSource<R, W> {
    fn decide(&mut self, proposal: &Proposal<'_>) -> Decision {
        match self.prompt(proposal) {
            Ok(answer) if answer.is_empty() => Decision::AcceptProposed,
            Ok(answer) if answer.eq_ignore_ascii_case("pass") => Decision::Skip,
            Ok(answer) => Decision::AcceptExplicit(answer),
            Err(e) => {
                warn!("Console input failed ({}), skipping", e);
                Decision::Skip
            }
        }
    }
}
