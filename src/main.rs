fn main() {
    let mut once = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("Meme Picker {}", meme_picker::VERSION);
                return;
            }
            "--help" | "-h" => {
                println!(
                    "Meme Picker — A random image meme from Reddit, in your terminal.\n\n  --once               Fetch one meme, print its title and URL, and exit\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message\n\nKeys: n/space another meme, o open in browser, q quit"
                );
                return;
            }
            "--once" => once = true,
            other => {
                eprintln!("unknown argument: {other} (see --help)");
                std::process::exit(2);
            }
        }
    }

    if once {
        match meme_picker::run_once() {
            Ok(true) => {}
            Ok(false) => std::process::exit(1),
            Err(err) => {
                eprintln!("error: {err:?}");
                std::process::exit(1);
            }
        }
        return;
    }

    if let Err(err) = meme_picker::run() {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}
