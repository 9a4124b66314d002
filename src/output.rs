use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::server::address::InterfaceAddr;
use crate::server::ShutdownReason;

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let template = ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(template);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn finish_spinner_success(spinner: &ProgressBar, msg: &str) {
    spinner.finish_with_message(format!("{} {}", style("✓").green().bold(), msg));
}

pub fn finish_spinner_error(spinner: &ProgressBar, msg: &str) {
    spinner.finish_with_message(format!("{} {}", style("✗").red().bold(), msg));
}

/// Banner printed under the QR code.
pub fn session_banner(url: &str, receiving: bool, keyboard: bool) -> String {
    let action = if receiving {
        "Scan the QR code to upload files to this computer"
    } else {
        "Scan the QR code to download"
    };
    let quit = if keyboard {
        "Enter q or press Ctrl+C to stop"
    } else {
        "Press Ctrl+C to stop"
    };
    format!(
        "{}\n{} {}\n{}",
        style(action).bold(),
        style("→").cyan(),
        style(url).underlined(),
        style(quit).dim()
    )
}

/// Final line describing how the session ended.
pub fn outcome_message(reason: &ShutdownReason) -> String {
    match reason {
        ShutdownReason::TransferComplete
        | ShutdownReason::DirectDownloadComplete
        | ShutdownReason::ReceiveComplete => {
            format!("{} Transfer completed successfully", style("✓").green().bold())
        }
        ShutdownReason::Interrupted | ShutdownReason::UserCancel => {
            format!("{} Session {}", style("•").yellow().bold(), reason)
        }
        ShutdownReason::Fatal(msg) => error_message(msg),
    }
}

pub fn error_message(msg: &str) -> String {
    format!("{} {}", style("✗").red().bold(), style(msg).red())
}

/// Numbered interface listing, ending with the `any` wildcard.
pub fn interface_list(interfaces: &[InterfaceAddr]) -> String {
    let mut lines = vec![style("Available network interfaces:").cyan().to_string()];
    let labels = interfaces
        .iter()
        .map(ToString::to_string)
        .chain(std::iter::once("any (0.0.0.0)".to_string()));
    for (idx, label) in labels.enumerate() {
        lines.push(format!("  {:>2}. {label}", idx + 1));
    }
    lines.join("\n")
}
