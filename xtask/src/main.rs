//! The i2s-vga build helper

/// The toolchain that knows about Xtensa
const ESP_TOOLCHAIN: &str = "+esp";

/// The ESP32 target
const ESP32_TARGET: &str = "xtensa-esp32-none-elf";

static HELP_TEXT: &str = r#"
The i2s-vga build helper version $CARGO_PKG_VERSION.

$CARGO_PKG_LICENSE

Options:

  * "help" - print this help text
  * "test" - run the host tests, with and without the register backend
  * "build" - cross-compile the library for the ESP32 (needs the esp toolchain)
  * "fmt" - format the code
  * "fmt-check" - check the code is formatted
  * "clippy" - run clippy on the library and this tool
"#;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Entry point to the program
///
/// We don't use anyhow or eyre here to keep the dependencies to a minimum
fn main() -> Result<()> {
    let command = std::env::args().nth(1).unwrap_or("help".to_string());
    match command.as_str() {
        "test" => {
            println!("Testing...");
            test()?;
        }
        "build" => {
            println!("Building...");
            build()?;
        }
        "fmt" => {
            println!("Running fmt...");
            run_all(&["fmt"])?;
        }
        "fmt-check" => {
            println!("Running fmt --check...");
            run_all(&["fmt", "--check"])?;
        }
        "clippy" => {
            println!("Running clippy...");
            run_all(&["clippy", "--all-targets"])?;
            run_in("i2s-vga", &["clippy", "--all-targets", "--features", "esp32"])?;
        }
        _ => {
            let help = HELP_TEXT.to_string();
            let help = help.replace("$CARGO_PKG_VERSION", env!("CARGO_PKG_VERSION"));
            let help = help.replace("$CARGO_PKG_LICENSE", env!("CARGO_PKG_LICENSE"));
            println!("{help}");
        }
    }
    Ok(())
}

/// Run the unit tests on the host
///
/// The defmt feature needs a global logger, which a host test binary doesn't
/// have, so we only check that it builds.
fn test() -> Result<()> {
    run_in("i2s-vga", &["test"])?;
    run_in("i2s-vga", &["test", "--features", "esp32"])?;
    run_in("i2s-vga", &["check", "--features", "defmt"])?;
    Ok(())
}

/// Cross-compile the library for the real chip
fn build() -> Result<()> {
    run_in(
        "i2s-vga",
        &[
            ESP_TOOLCHAIN,
            "build",
            "--release",
            "--target",
            ESP32_TARGET,
            "-Zbuild-std=core,alloc",
            "--features",
            "esp32,defmt",
        ],
    )?;
    println!("** Complete! **");
    Ok(())
}

/// Run a cargo command in one sub-project
fn run_in(dir: &str, args: &[&str]) -> Result<()> {
    let mut command = std::process::Command::new("cargo");
    command.args(args);
    command.current_dir(dir);
    run_command(command)
}

/// Run a cargo command against all sub-projects
fn run_all(args: &[&str]) -> Result<()> {
    for x in ["xtask", "i2s-vga"] {
        run_in(x, args)?;
    }
    Ok(())
}

/// Run a command to completion and check it worked OK
fn run_command(mut command: std::process::Command) -> Result<()> {
    if let Some(cwd) = command.get_current_dir() {
        println!("Running {command:?} in {cwd}", cwd = cwd.display());
    } else {
        println!("Running {command:?}");
    }
    let mut child = command.spawn()?;
    let status = child.wait()?;
    if !status.success() {
        return Err(Box::from("Command failed"));
    }
    Ok(())
}

// End of file
