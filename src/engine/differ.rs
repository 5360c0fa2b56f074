//! Diff display - upkeep-specific UI

use colored::Colorize;
use reconcile::{DiffAction, DiffList};

/// Display the pending changes of every component
pub fn display_diff(diffs: &[DiffList]) {
    let total: usize = diffs.iter().map(DiffList::len).sum();
    if total == 0 {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Maintenance Diff".bold()
    );
    println!("│");

    for diff in diffs.iter().filter(|d| !d.is_empty()) {
        println!(
            "│ {} {}",
            diff.component.slug().bold(),
            format!("({})", diff.strategy).dimmed()
        );

        for item in &diff.items {
            let (symbol, state_desc) = match &item.action {
                DiffAction::Remove => ("-".red(), "(will remove)".to_string()),
                DiffAction::Set { from: None, to } => ("+".green(), format!("(unset) → {to}")),
                DiffAction::Set { from: Some(from), to } => ("~".yellow(), format!("{from} → {to}")),
                DiffAction::Adjust { from, to } => ("~".yellow(), format!("{from} → {to}")),
            };
            println!("│   {} {:<40} {}", symbol, item.name, state_desc.dimmed());
        }
        println!("│");
    }

    let components = diffs.iter().filter(|d| !d.is_empty()).count();
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} changes across {} components",
        total.to_string().bold(),
        components.to_string().bold()
    );
    println!("└─────────────────────────────────────────────────────┘");
}
