use clap::Parser;
use training::util::{run_translate, TranslateArgs};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = TranslateArgs::parse();
    let output_dir = args.output_dir.clone();
    let count = run_translate(args)?;
    println!("Translated {count} image(s) into {output_dir}");
    Ok(())
}
