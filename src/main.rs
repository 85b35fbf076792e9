use ai_navigator::cli::{self, NavigationAborted};

fn main() {
    if let Err(err) = cli::main() {
        if !err.is::<NavigationAborted>() {
            eprintln!("✗ {err}");
        }
        std::process::exit(1);
    }
}
