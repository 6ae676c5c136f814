use framevm::cli;

fn main() {
    dotenvy::dotenv().ok();

    match cli::run_cli() {
        Ok(status) => std::process::exit(status),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            std::process::exit(1);
        }
    }
}
