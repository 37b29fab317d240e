use anyhow::{bail, Result};
use log::error;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error_bail;

/// Reads lines from a list of local files, one file after another.
///
/// The feeder uses this to replay recorded event streams; tests use it for
/// fixtures. Each item is one raw payload line.
pub struct LocalFileReader {
    filenames: Vec<String>,
    reader: Option<BufReader<File>>,
    pos: usize,
}

impl LocalFileReader {
    pub fn new(filenames: &Vec<String>) -> Result<Self> {
        // Check if all files exist
        for filename in filenames {
            if !Path::new(filename).exists() {
                error_bail!("File not found: {}", filename.clone());
            }
        }

        Ok(LocalFileReader {
            filenames: filenames.clone(),
            reader: None,
            pos: 0,
        })
    }

    fn open_next_file(&mut self) -> Result<()> {
        if self.pos >= self.filenames.len() {
            bail!("no more files");
        }

        let filename = &self.filenames[self.pos];
        let file = File::open(Path::new(filename))?;

        self.pos += 1;
        self.reader = Some(BufReader::new(file));

        Ok(())
    }

    fn read_line_from_next_file(&mut self) -> Option<Result<String>> {
        match self.open_next_file() {
            Ok(_) => self.next(),
            Err(_) => None,
        }
    }
}

impl Iterator for LocalFileReader {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.as_mut() {
            Some(reader) => match reader.lines().next() {
                Some(line) => Some(line.map_err(|e| e.into())),
                None => self.read_line_from_next_file(),
            },
            None => self.read_line_from_next_file(),
        }
    }
}

/// Test fixture: a small recorded event stream with a few malformed lines.
pub fn get_test_event_filenames(count: usize) -> Vec<String> {
    let filename = "resources/account_events.jsonl".to_string();

    (0..count).map(|_| filename.clone()).collect()
}
