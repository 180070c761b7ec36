use crate::config::DEFAULT_OUTPUT;
use crate::errors::DownloaderError;
use crate::prelude::*;
use std::io::{BufRead, Write};

/// Raw answers of the interactive front-end. `None` means keep the default.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Answers {
    pub url: Option<String>,
    pub output: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Asks for the four inputs once. Values in `defaults` are offered as defaults.
pub fn ask_inputs<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    defaults: Answers,
) -> Result<Answers> {
    let url = loop {
        let hint = defaults.url.as_deref().unwrap_or("required");
        match ask(input, output, "URL of M3U8", hint)? {
            Some(url) if !url.is_empty() => break url,
            Some(_) => match &defaults.url {
                Some(url) => break url.clone(),
                None => writeln!(output, "A playlist URL is required.")
                    .map_err(DownloaderError::Prompt)?,
            },
            None => match &defaults.url {
                Some(url) => break url.clone(),
                None => return Err(DownloaderError::MissingUrl),
            },
        }
    };
    let output_file = ask_optional(
        input,
        output,
        "Output filename",
        defaults.output.as_deref().unwrap_or(DEFAULT_OUTPUT),
    )?;
    let start = ask_optional(
        input,
        output,
        "Start time HH:MM:SS",
        defaults.start.as_deref().unwrap_or("00:00:00"),
    )?;
    let end = ask_optional(
        input,
        output,
        "End time HH:MM:SS",
        defaults.end.as_deref().unwrap_or("end of video"),
    )?;

    let answers = Answers {
        url: Some(url),
        output: output_file.or(defaults.output),
        start: start.or(defaults.start),
        end: end.or(defaults.end),
    };
    debug!("interactive answers: {:?}", answers);
    Ok(answers)
}

fn ask_optional<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    question: &str,
    hint: &str,
) -> Result<Option<String>> {
    Ok(ask(input, output, question, hint)?.filter(|answer| !answer.is_empty()))
}

/// Returns `None` at end of input, otherwise the trimmed line.
fn ask<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    question: &str,
    hint: &str,
) -> Result<Option<String>> {
    write!(output, "{} [{}]: ", question, hint).map_err(DownloaderError::Prompt)?;
    output.flush().map_err(DownloaderError::Prompt)?;
    let mut line = String::new();
    let read = input.read_line(&mut line).map_err(DownloaderError::Prompt)?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run(input: &str, defaults: Answers) -> (Result<Answers>, String) {
        let mut input = Cursor::new(input.as_bytes().to_vec());
        let mut output = Vec::new();
        let result = ask_inputs(&mut input, &mut output, defaults);
        (result, String::from_utf8(output).unwrap())
    }

    #[test]
    fn collects_all_four_inputs() {
        let (answers, transcript) = run(
            "https://example.com/a.m3u8\nclip.mp4\n00:42:30\n00:58:20\n",
            Answers::default(),
        );
        assert_eq!(
            answers.unwrap(),
            Answers {
                url: Some("https://example.com/a.m3u8".to_string()),
                output: Some("clip.mp4".to_string()),
                start: Some("00:42:30".to_string()),
                end: Some("00:58:20".to_string()),
            }
        );
        assert!(transcript.contains("URL of M3U8 [required]: "));
        assert!(transcript.contains("Output filename [ft_video.mp4]: "));
        assert!(transcript.contains("End time HH:MM:SS [end of video]: "));
    }

    #[test]
    fn blank_answers_keep_defaults() {
        let (answers, _) = run("https://example.com/a.m3u8\n\n\n\n", Answers::default());
        assert_eq!(
            answers.unwrap(),
            Answers {
                url: Some("https://example.com/a.m3u8".to_string()),
                ..Answers::default()
            }
        );
    }

    #[test]
    fn asks_again_for_an_empty_url() {
        let (answers, transcript) = run("\n  \nhttps://example.com/a.m3u8\n", Answers::default());
        let answers = answers.unwrap();
        assert_eq!(answers.url.as_deref(), Some("https://example.com/a.m3u8"));
        assert_eq!(transcript.matches("A playlist URL is required.").count(), 2);
        assert_eq!(answers.output, None);
    }

    #[test]
    fn end_of_input_without_url_fails() {
        let (answers, _) = run("", Answers::default());
        assert!(matches!(answers, Err(DownloaderError::MissingUrl)));
    }

    #[test]
    fn command_line_values_are_offered_as_defaults() {
        let defaults = Answers {
            url: Some("https://example.com/a.m3u8".to_string()),
            start: Some("00:01:00".to_string()),
            ..Answers::default()
        };
        let (answers, transcript) = run("\nout.mp4\n\n00:02:00\n", defaults);
        assert_eq!(
            answers.unwrap(),
            Answers {
                url: Some("https://example.com/a.m3u8".to_string()),
                output: Some("out.mp4".to_string()),
                start: Some("00:01:00".to_string()),
                end: Some("00:02:00".to_string()),
            }
        );
        assert!(transcript.contains("URL of M3U8 [https://example.com/a.m3u8]: "));
    }
}
