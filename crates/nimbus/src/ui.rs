//! Terminal output and the interactive debug pause.

use std::sync::Arc;

use async_trait::async_trait;
use console::style;
use nimbus_builder::Ui;
use nimbus_multistep::{Pause, StateBag};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Prefixes every line with the build name.
pub struct ConsoleUi {
    name: String,
}

impl ConsoleUi {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Ui for ConsoleUi {
    fn say(&self, message: &str) {
        println!(
            "{} {}",
            style(format!("==> {}:", self.name)).green().bold(),
            style(message).bold()
        );
    }

    fn message(&self, message: &str) {
        println!("    {} {message}", style(format!("{}:", self.name)).green());
    }

    fn error(&self, message: &str) {
        eprintln!(
            "{} {}",
            style(format!("==> {}:", self.name)).red().bold(),
            style(message).red()
        );
    }
}

/// Waits for Enter on stdin.
pub struct StdinPause {
    ui: Arc<ConsoleUi>,
}

impl StdinPause {
    pub fn new(ui: Arc<ConsoleUi>) -> Self {
        Self { ui }
    }
}

#[async_trait]
impl Pause for StdinPause {
    async fn pause(&self, step: &str, _state: &StateBag) {
        self.ui.say(&format!(
            "Pausing after run of step '{step}'. Press enter to continue."
        ));
        let mut line = String::new();
        if let Err(e) = BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
            tracing::warn!(error = %e, "could not read from stdin, continuing");
        }
    }
}
