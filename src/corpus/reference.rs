//! 章节引用解析与规范化：`Ruth 1:1-5`、`1 Samuel 3:1-4`、`ruth 1:3`

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::corpus::CorpusError;

/// 规范化后的章节引用（单章内的连续节范围）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PassageRef {
    pub book: String,
    pub chapter: u32,
    pub start_verse: u32,
    pub end_verse: u32,
}

impl PassageRef {
    pub fn parse(input: &str) -> Result<Self, CorpusError> {
        let invalid = || CorpusError::InvalidReference(input.to_string());
        let trimmed = input.trim();
        let (book, location) = trimmed.rsplit_once(char::is_whitespace).ok_or_else(invalid)?;
        let book = normalize_book(book);
        if book.is_empty() {
            return Err(invalid());
        }

        let (chapter, verses) = location.split_once(':').ok_or_else(invalid)?;
        let chapter: u32 = chapter.trim().parse().map_err(|_| invalid())?;
        let (start, end) = match verses.split_once('-') {
            Some((s, e)) => (s, e),
            None => (verses, verses),
        };
        let start_verse: u32 = start.trim().parse().map_err(|_| invalid())?;
        let end_verse: u32 = end.trim().parse().map_err(|_| invalid())?;

        if chapter == 0 || start_verse == 0 || end_verse < start_verse {
            return Err(invalid());
        }

        Ok(Self {
            book,
            chapter,
            start_verse,
            end_verse,
        })
    }

    pub fn contains(&self, book: &str, chapter: u32, verse: u32) -> bool {
        normalize_book(book) == self.book
            && chapter == self.chapter
            && (self.start_verse..=self.end_verse).contains(&verse)
    }
}

impl fmt::Display for PassageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start_verse == self.end_verse {
            write!(f, "{} {}:{}", self.book, self.chapter, self.start_verse)
        } else {
            write!(
                f,
                "{} {}:{}-{}",
                self.book, self.chapter, self.start_verse, self.end_verse
            )
        }
    }
}

/// 书名规范化：压缩空白、每个词首字母大写（`1 samuel` -> `1 Samuel`）
pub fn normalize_book(book: &str) -> String {
    book.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
