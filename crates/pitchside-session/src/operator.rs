//! Operator implementations: the interactive console prompt and a scripted
//! stand-in for tests.
//!
//! Prompts go through stdout/stdin directly rather than `tracing`; they are
//! the user interface of a stalled harvest, not diagnostics.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Mutex;

use pitchside_core::{Diagnostic, Operator, OperatorChoice};

/// Blocking 1/2/3 prompt on the controlling terminal. Invalid input is
/// re-prompted; end of input is taken as an abort.
#[derive(Debug, Default)]
pub struct ConsoleOperator;

impl Operator for ConsoleOperator {
    fn resolve_timeout(&self, diagnostic: &Diagnostic) -> OperatorChoice {
        println!("{diagnostic}");
        loop {
            println!("1: Problem was solved manually. Please continue.");
            println!("2: Problem cannot be solved. Please continue without this step.");
            println!("3: Abort the harvest and export everything captured so far.");
            print!("> ");
            let _ = io::stdout().flush();

            let mut line = String::new();
            match io::stdin().lock().read_line(&mut line) {
                Ok(0) | Err(_) => return OperatorChoice::Abort,
                Ok(_) => {}
            }
            match line.trim() {
                "1" => return OperatorChoice::FixedRetry,
                "2" => return OperatorChoice::ContinueWithout,
                "3" => return OperatorChoice::Abort,
                other => println!("Invalid input {other:?}. Please enter 1, 2 or 3."),
            }
        }
    }

    fn confirm_output_released(&self, path: &Path) {
        println!(
            "Cannot write {}. Please hit Enter when you closed the file.",
            path.display()
        );
        let mut line = String::new();
        let _ = io::stdin().lock().read_line(&mut line);
    }
}

/// Answers prompts from a fixed queue. An exhausted queue aborts, so a test
/// that stalls more often than scripted fails loudly instead of hanging.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    choices: Mutex<VecDeque<OperatorChoice>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOperator {
    pub fn with_choices(choices: impl IntoIterator<Item = OperatorChoice>) -> Self {
        Self {
            choices: Mutex::new(choices.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Diagnostics shown so far, in prompt order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("operator state poisoned").clone()
    }
}

impl Operator for ScriptedOperator {
    fn resolve_timeout(&self, diagnostic: &Diagnostic) -> OperatorChoice {
        self.prompts
            .lock()
            .expect("operator state poisoned")
            .push(diagnostic.to_string());
        self.choices
            .lock()
            .expect("operator state poisoned")
            .pop_front()
            .unwrap_or(OperatorChoice::Abort)
    }

    fn confirm_output_released(&self, path: &Path) {
        panic!("unexpected locked output {}", path.display());
    }
}
