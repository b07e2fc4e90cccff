use std::{io::IsTerminal, path::PathBuf, process::ExitCode, sync::Arc};

use ytconv::{
    converter::Converter, options::Options, protocol::Format, stats::DownloadStatistics,
    util::{self, HttpClient},
    youtube,
};

const USAGE: &str = "Usage: ytconv <youtube-url> [mp3|mp4|audio|video]";

async fn run(url: &str, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let options = Options::from_env();
    let client = Arc::new(HttpClient::new(&options)?);
    let converter = Converter::new(client.clone(), &options);

    if let Some(id) = youtube::extract_video_id(url) {
        println!("Video ID: {}", id);
    }
    println!("Format: {}", format);
    let res = converter.resolve(url, format).await?;
    if let Some(title) = &res.title {
        println!("Title: {}", title);
    }
    println!("Download URL: {}", res.download_url);

    let path = PathBuf::from(&res.filename);
    println!("Saving to {}", path.display());
    let mut stats = DownloadStatistics {
        // No progress line when piped
        quiet: !std::io::stdout().is_terminal(),
        ..DownloadStatistics::new()
    };
    let size = client
        .download_file(&res.download_url, &path, &mut stats)
        .await?;
    println!();
    println!("Done, {} written", util::format_bytes(size as u64));

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        eprintln!("{}", USAGE);
        return ExitCode::FAILURE;
    };
    let format = match args.next().as_deref().unwrap_or("mp3").parse::<Format>() {
        Ok(format) => format,
        Err(e) => {
            eprintln!("{}\n{}", e, USAGE);
            return ExitCode::FAILURE;
        }
    };

    match run(&url, format).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
