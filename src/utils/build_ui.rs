use colored::*;
use std::time::Duration;

/// Terminal summary printed after a build
pub struct BuildUI;

#[derive(Debug, Clone)]
pub struct OutputFileInfo {
    pub name: String,
    pub size: usize,
}

impl BuildUI {
    pub fn show_banner(mode: &str) {
        println!(
            "\n  {} {} {}",
            "KILN".bright_cyan().bold(),
            env!("CARGO_PKG_VERSION").bright_white(),
            format!("({})", mode).bright_black()
        );
        println!();
    }

    pub fn show_completion(outdir: &str, files: &[OutputFileInfo], elapsed: Duration) {
        println!();
        let width = files.iter().map(|f| f.name.len()).max().unwrap_or(0);
        for file in files {
            println!(
                "  {}{} {}",
                format!("{}/", outdir).bright_black(),
                format!("{:<width$}", file.name, width = width).bright_cyan(),
                format_size(file.size).bright_black()
            );
        }

        println!();
        println!(
            "  {} built in {}",
            "✓".bright_green(),
            format!("{:.0}ms", elapsed.as_secs_f64() * 1000.0).bright_white().bold()
        );
    }

    pub fn show_dev_ready(url: &str, hmr_port: Option<u16>) {
        println!();
        println!("  {} {}", "➜".bright_green(), url.bright_cyan().bold());
        if let Some(port) = hmr_port {
            println!("  {} hot reload on port {}", "➜".bright_black(), port.to_string().bright_white());
        }
        println!();
    }
}

pub fn format_size(bytes: usize) -> String {
    let kb = bytes as f64 / 1024.0;
    if kb < 1.0 {
        format!("{} B", bytes)
    } else if kb < 1024.0 {
        format!("{:.2} kB", kb)
    } else {
        format!("{:.2} MB", kb / 1024.0)
    }
}
