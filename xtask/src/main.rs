// db-agents - Build Task Runner
// Unified build system using cargo xtask pattern

use anyhow::{Context, Result};
use xshell::{cmd, Shell};

fn main() -> Result<()> {
    let sh = Shell::new()?;
    let args: Vec<_> = std::env::args().skip(1).collect();

    match args.get(0).map(|s| s.as_str()) {
        Some("build") => {
            let release = args.contains(&"--release".to_string());
            build(&sh, release)
        }
        Some("test") => test(&sh),
        Some("format") => {
            let check = args.contains(&"--check".to_string());
            format(&sh, check)
        }
        Some("clippy") => clippy(&sh),
        Some("run") => run(&sh, &args[1..]),
        Some("clean") => clean(&sh),
        Some("ci") => ci(&sh),
        _ => {
            print_help();
            Ok(())
        }
    }
}

fn print_help() {
    println!("db-agents - Build Commands:");
    println!();
    println!("Usage: cargo xtask <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  build [--release]   Build the agent binary");
    println!("  test                Run all tests");
    println!("  format [--check]    Format code (check mode doesn't modify)");
    println!("  clippy              Run clippy checks");
    println!("  run [ARGS...]       Build and run the agent binary");
    println!("  clean               Clean build artifacts");
    println!("  ci                  Run all CI checks (format + clippy + build + test)");
    println!();
    println!("Examples:");
    println!("  cargo xtask build");
    println!("  cargo xtask build --release");
    println!("  cargo xtask test");
    println!("  cargo xtask format --check");
}

fn build(sh: &Shell, release: bool) -> Result<()> {
    let _dir = sh.push_dir(project_root());
    if release {
        cmd!(sh, "cargo build --release --workspace").run().context("Failed to build in release mode")?;
    } else {
        cmd!(sh, "cargo build --workspace").run().context("Failed to build")?;
    }
    Ok(())
}

fn test(sh: &Shell) -> Result<()> {
    let _dir = sh.push_dir(project_root());
    cmd!(sh, "cargo test --workspace").run().context("Tests failed")?;
    Ok(())
}

fn format(sh: &Shell, check: bool) -> Result<()> {
    let _dir = sh.push_dir(project_root());
    if check {
        cmd!(sh, "cargo fmt --all -- --check").run().context("Code is not formatted")?;
    } else {
        cmd!(sh, "cargo fmt --all").run().context("Failed to format code")?;
    }
    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    let _dir = sh.push_dir(project_root());
    cmd!(sh, "cargo clippy --workspace --all-targets -- --deny warnings").run().context("Clippy checks failed")?;
    Ok(())
}

fn run(sh: &Shell, args: &[String]) -> Result<()> {
    let _dir = sh.push_dir(project_root());
    let mut cmd = cmd!(sh, "cargo run --package db-agents --");
    for arg in args {
        cmd = cmd.arg(arg);
    }
    cmd.run().context("Failed to run agent")?;
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    let _dir = sh.push_dir(project_root());
    cmd!(sh, "cargo clean").run()?;
    Ok(())
}

fn ci(sh: &Shell) -> Result<()> {
    format(sh, true)?;
    clippy(sh)?;
    build(sh, false)?;
    test(sh)?;
    Ok(())
}

fn project_root() -> std::path::PathBuf {
    std::path::Path::new(&env!("CARGO_MANIFEST_DIR")).ancestors().nth(1).unwrap().to_path_buf()
}
