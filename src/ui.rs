use std::io::{self, IsTerminal, Write};

pub fn info(message: &str) {
    println!("{message}");
}

pub fn warn(message: &str) {
    eprintln!("warning: {message}");
}

pub fn error(message: &str) {
    eprintln!("error: {message}");
}

pub fn blank_line() {
    println!();
}

/// Rewrite the current line in place on a terminal, or print plain lines
/// otherwise so logs stay readable.
pub fn progress_line(message: &str, finished: bool) {
    let mut stdout = io::stdout();
    if stdout.is_terminal() {
        let _ = write!(stdout, "\r{message}");
        if finished {
            let _ = writeln!(stdout);
        }
        let _ = stdout.flush();
    } else if finished {
        println!("{message}");
    }
}

pub fn build_summary(receipt_id: &str, base_image_id: &str, download_url: Option<&str>) {
    blank_line();
    match download_url {
        Some(url) => {
            println!("Summary: image {receipt_id} built from '{base_image_id}'");
            println!("Download: {url}");
        }
        None => println!("Summary: image {receipt_id} submitted from '{base_image_id}'"),
    }
}

pub fn plural(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{count} {singular}")
    } else {
        format!("{count} {plural}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plural() {
        assert_eq!(plural(1, "file", "files"), "1 file");
        assert_eq!(plural(0, "file", "files"), "0 files");
        assert_eq!(plural(3, "image", "images"), "3 images");
    }
}
