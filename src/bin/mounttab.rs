use anyhow::Result;

fn main() -> Result<()> {
    mounttab::cli::run()
}
