use refract_cli::{build_command, exit_code, init_tracing, run};

#[tokio::main]
async fn main() {
    let matches = build_command().get_matches();
    init_tracing(matches.get_one::<String>("log-format").is_some_and(|f| f == "json"));

    match run(&matches).await {
        Ok(document) => {
            println!("Best score: {:.2} (branch {})", document.best_score, document.winning_branch);
            println!("Best prompt: {}", document.best_prompt);
            if let Some(image) = &document.best_image {
                println!("Best image: {}", image.display());
            }
        }
        Err(err) => {
            tracing::error!("search failed: {err:#}");
            eprintln!("error: {err:#}");
            std::process::exit(exit_code(&err));
        }
    }
}
