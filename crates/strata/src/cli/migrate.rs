use console::style;

use strata_core::error::Result;
use strata_runtime::migrations::{MigrationStatus, Migrator};

fn print_header(title: &str) {
    println!();
    println!("  {} {}", style("STRATA").bold().cyan(), title);
    println!();
}

/// Apply every pending migration.
pub async fn migrate(migrator: &Migrator) -> Result<()> {
    print_header("Migrations");
    println!("  {} Running pending migrations...", style("→").dim());

    let applied = migrator.migrate().await?;

    if applied.is_empty() {
        println!("  {} Schema is up to date", style("ℹ").blue());
    } else {
        for id in &applied {
            println!("  {} Applied: {}", style("✓").green(), id);
        }
        println!();
        println!(
            "  {} Applied {} migration(s)",
            style("✓").green(),
            applied.len()
        );
    }
    println!();
    Ok(())
}

/// Roll back the `count` most recently applied migrations.
pub async fn rollback(migrator: &Migrator, count: usize) -> Result<()> {
    print_header("Migrations");
    println!(
        "  {} Rolling back {} migration(s)...",
        style("→").dim(),
        count
    );

    let rolled_back = migrator.rollback(count).await?;

    if rolled_back.is_empty() {
        println!("  {} No migrations to rollback", style("ℹ").blue());
    } else {
        for id in &rolled_back {
            println!("  {} Rolled back: {}", style("✓").green(), id);
        }
        println!();
        println!(
            "  {} Rolled back {} migration(s)",
            style("✓").green(),
            rolled_back.len()
        );
    }
    println!();
    Ok(())
}

pub async fn show_status(migrator: &Migrator) -> Result<()> {
    print_header("Migration Status");

    let status = migrator.status().await?;
    print_status(&status);
    Ok(())
}

fn print_status(status: &MigrationStatus) {
    if status.applied.is_empty() && status.pending.is_empty() {
        println!("  {} No migrations found", style("ℹ").blue());
        println!();
        return;
    }

    if !status.applied.is_empty() {
        println!("  {} Applied:", style("✓").green());
        for m in &status.applied {
            let marker = if !m.known {
                style("?").red().to_string()
            } else if m.reversible {
                style("↓").green().to_string()
            } else {
                style("-").dim().to_string()
            };
            println!(
                "    {} {} {} ({})",
                marker,
                style(&m.id).cyan(),
                style("at").dim(),
                m.applied_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    if !status.pending.is_empty() {
        if !status.applied.is_empty() {
            println!();
        }
        println!("  {} Pending:", style("○").yellow());
        for id in &status.pending {
            println!("    {} {}", style("→").dim(), style(id).yellow());
        }
    }

    println!();
    println!(
        "  {} {} applied, {} pending, {} unknown",
        style("ℹ").blue(),
        status.applied.len(),
        status.pending.len(),
        status.orphaned().count()
    );
    println!();

    println!(
        "  {} = has down migration, {} = no down migration, {} = not registered",
        style("↓").green(),
        style("-").dim(),
        style("?").red()
    );
    println!();
}
