use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::Parser;

use glimmer::{Engine, InputReader, Show};

#[derive(Parser, Debug)]
#[command(name = "glimmer", version)]
struct Cli {
    /// Show definition JSON.
    #[arg(short, long)]
    show: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let show = read_show_json(&cli.show)?;
    show.validate()?;

    let mut sink = glimmer::create_sink(&show)?;

    let (reader, keys) = InputReader::spawn()?;
    let mut engine = Engine::new(&show, keys, reader.stop_signal())?;

    engine.run(sink.as_mut());
    reader.join();

    Ok(())
}

fn read_show_json(path: &Path) -> anyhow::Result<Show> {
    let f = File::open(path).with_context(|| format!("open show '{}'", path.display()))?;
    let r = BufReader::new(f);
    let show: Show = serde_json::from_reader(r).with_context(|| "parse show JSON")?;
    Ok(show)
}
