use mysh::{reaper, Shell};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut shell = Shell::new();
    shell.load_state();
    shell.claim_terminal();
    reaper::install()?;

    shell.repl()
}
