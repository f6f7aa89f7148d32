//! Featherfront entry point.

#![allow(clippy::print_stderr)]

fn main() {
    if let Err(e) = featherfront::run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
