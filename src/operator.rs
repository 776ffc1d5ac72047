// ============================================
// catalogsetup - operator.rs
// ============================================
// Everything that waits for the person at the keyboard.
//
// The tool never "fixes" a bad scan directory on its own: when there is no
// catalog (or more than one) it says so and waits until the operator has
// sorted the files out, or quits.
// ============================================

use anyhow::Result;
use colored::Colorize;
use dialoguer::{Input, Select};

/// Answer to "the scan directory is wrong, what now?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Files were fixed, scan again
    Retry,
    /// Give up
    Quit,
}

/// Answer to "configuration written, what next?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Open the update client
    Continue,
    /// Hash the catalog and write the registry again
    Reapply,
    /// Exit now
    Quit,
}

/// The person running the tool.
pub trait Operator {
    /// Explain `problem` and wait until the operator has dealt with it.
    fn fix_and_retry(&mut self, problem: &str) -> Result<Decision>;

    /// Ask what to do once the configuration has been written.
    fn after_configure(&mut self) -> Result<NextStep>;
}

// ============================================
// CONSOLE OPERATOR
// ============================================

/// Interactive prompts on the console
pub struct ConsoleOperator;

impl Operator for ConsoleOperator {
    fn fix_and_retry(&mut self, problem: &str) -> Result<Decision> {
        println!("{}", problem.red());

        let answer: String = Input::new()
            .with_prompt("Fix the files and press <Enter> to scan again, or type q to quit")
            .allow_empty(true)
            .interact_text()?;

        if answer.trim().eq_ignore_ascii_case("q") {
            Ok(Decision::Quit)
        } else {
            Ok(Decision::Retry)
        }
    }

    fn after_configure(&mut self) -> Result<NextStep> {
        let choices = [
            "Open the update client",
            "Write the registry again",
            "Quit",
        ];

        let picked = Select::new()
            .with_prompt("What next?")
            .items(&choices)
            .default(0)
            .interact()?;

        Ok(match picked {
            1 => NextStep::Reapply,
            2 => NextStep::Quit,
            _ => NextStep::Continue,
        })
    }
}

// ============================================
// CONSOLE OUTPUT
// ============================================

/// A step is starting
pub fn announce(message: &str) {
    println!("{}", message.yellow());
}

/// A step finished fine
pub fn success(message: &str) {
    println!("{}", message.green());
}

/// Something the operator has to look at
pub fn problem(message: &str) {
    println!("{}", message.red());
}

// ============================================
// SCRIPTED OPERATOR (tests)
// ============================================

#[cfg(test)]
pub use scripted::ScriptedOperator;
