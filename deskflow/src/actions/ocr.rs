//! Text recognition through the `tesseract` CLI.

use super::screen::capture;
use super::util::{command_options, seconds};
use super::Region;
use crate::context::MacroContext;
use crate::errors::ActionError;
use crate::executor::MacroExecutor;
use crate::process::run_command;
use crate::registry::{ActionArgs, ActionRegistry, HandlerResult};
use anyhow::anyhow;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;

pub fn register(registry: &mut ActionRegistry) {
    registry.register("ocr.read", read_action);
    registry.register("ocr.find-text", find_text_action);
    registry.register("ocr.wait-for-text", wait_for_text_action);
}

/// One recognized word with its bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct WordBox {
    pub text: String,
    pub left: i64,
    pub top: i64,
    pub width: i64,
    pub height: i64,
    pub confidence: f64,
}

/// A located piece of text, in screen coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBounds {
    pub text: String,
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    pub confidence: f64,
}

impl TextBounds {
    pub fn center(&self) -> (i64, i64) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    pub fn to_value(&self) -> Value {
        let (cx, cy) = self.center();
        json!({
            "text": self.text,
            "x": self.x,
            "y": self.y,
            "width": self.width,
            "height": self.height,
            "center_x": cx,
            "center_y": cy,
            "confidence": self.confidence,
        })
    }
}

/// Parses `tesseract ... tsv` output, skipping the header, empty words and
/// rows without a confidence.
pub fn parse_tsv(output: &str) -> Vec<WordBox> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 12 {
                return None;
            }
            let text = parts[11].trim();
            if text.is_empty() || parts[10].trim() == "-1" {
                return None;
            }
            Some(WordBox {
                text: text.to_string(),
                left: parts[6].trim().parse().ok()?,
                top: parts[7].trim().parse().ok()?,
                width: parts[8].trim().parse().ok()?,
                height: parts[9].trim().parse().ok()?,
                confidence: parts[10].trim().parse().ok()?,
            })
        })
        .collect()
}

/// Finds `needle` (possibly several words) in the recognized words and
/// returns the box covering every word it touches.
pub fn locate_text(words: &[WordBox], needle: &str, case_sensitive: bool) -> Option<TextBounds> {
    let normalize = |s: &str| {
        if case_sensitive {
            s.to_string()
        } else {
            s.to_lowercase()
        }
    };
    let search = normalize(needle.trim());
    if search.is_empty() || words.is_empty() {
        return None;
    }

    let mut full = String::new();
    let mut spans = Vec::with_capacity(words.len());
    for word in words {
        if !full.is_empty() {
            full.push(' ');
        }
        let start = full.len();
        full.push_str(&normalize(&word.text));
        spans.push((start, full.len()));
    }

    let start = full.find(&search)?;
    let end = start + search.len();
    let matched: Vec<&WordBox> = words
        .iter()
        .zip(&spans)
        .filter(|(_, (s, e))| *s < end && *e > start)
        .map(|(w, _)| w)
        .collect();
    if matched.is_empty() {
        return None;
    }

    let min_x = matched.iter().map(|w| w.left).min()?;
    let min_y = matched.iter().map(|w| w.top).min()?;
    let max_x = matched.iter().map(|w| w.left + w.width).max()?;
    let max_y = matched.iter().map(|w| w.top + w.height).max()?;
    let confidence = matched.iter().map(|w| w.confidence).sum::<f64>() / matched.len() as f64;

    Some(TextBounds {
        text: needle.to_string(),
        x: min_x,
        y: min_y,
        width: max_x - min_x,
        height: max_y - min_y,
        confidence,
    })
}

struct OcrRequest {
    image: Option<PathBuf>,
    region: Option<Region>,
    lang: String,
    psm: i64,
}

impl OcrRequest {
    fn from_args(args: &ActionArgs) -> Result<Self, ActionError> {
        Ok(Self {
            image: args.opt_str("image").map(PathBuf::from),
            region: Region::from_args(args)?,
            lang: args.str_or("lang", "eng"),
            psm: args.i64_or("psm", 3)?,
        })
    }

    fn offset(&self) -> (i64, i64) {
        match (&self.image, self.region) {
            (None, Some(r)) => (i64::from(r.x), i64::from(r.y)),
            _ => (0, 0),
        }
    }

    /// Runs tesseract on the given image, or on a fresh capture that is
    /// removed afterwards.
    fn run(&self, executor: &MacroExecutor, format: Option<&str>) -> Result<String, ActionError> {
        match &self.image {
            Some(path) => self.tesseract(executor, path, format),
            None => {
                let shot = capture(executor, self.region, None, None)?;
                let result = self.tesseract(executor, &shot, format);
                if let Err(e) = std::fs::remove_file(&shot) {
                    debug!("Could not remove screenshot {:?}: {}", shot, e);
                }
                result
            }
        }
    }

    fn tesseract(
        &self,
        executor: &MacroExecutor,
        image: &Path,
        format: Option<&str>,
    ) -> Result<String, ActionError> {
        let image = image.to_string_lossy();
        let psm = self.psm.to_string();
        let mut argv = vec![
            &*image,
            "stdout",
            "-l",
            self.lang.as_str(),
            "--psm",
            psm.as_str(),
        ];
        argv.extend(format);
        Ok(run_command("tesseract", &argv, &command_options(executor))?)
    }

    fn words(&self, executor: &MacroExecutor) -> Result<Vec<WordBox>, ActionError> {
        let (dx, dy) = self.offset();
        Ok(parse_tsv(&self.run(executor, Some("tsv"))?)
            .into_iter()
            .map(|w| WordBox {
                left: w.left + dx,
                top: w.top + dy,
                ..w
            })
            .collect())
    }
}

fn read_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let request = OcrRequest::from_args(args)?;
    let text = request.run(executor, None)?;
    Ok(Some(json!(text)))
}

fn find_text_action(args: &ActionArgs, _ctx: &mut MacroContext, executor: &MacroExecutor) -> HandlerResult {
    let request = OcrRequest::from_args(args)?;
    let text = args.str("text")?;
    let words = request.words(executor)?;
    let found = locate_text(&words, &text, args.bool_or("case_sensitive", false)?);
    Ok(Some(found.map(|b| b.to_value()).unwrap_or(Value::Null)))
}

fn wait_for_text_action(
    args: &ActionArgs,
    _ctx: &mut MacroContext,
    executor: &MacroExecutor,
) -> HandlerResult {
    let request = OcrRequest::from_args(args)?;
    let text = args.str("text")?;
    let case_sensitive = args.bool_or("case_sensitive", false)?;
    let timeout = seconds(args.f64_or("timeout", 30.0)?, "timeout")?;
    let interval = seconds(args.f64_or("interval", 1.0)?, "interval")?;

    let start = Instant::now();
    loop {
        let words = request.words(executor)?;
        if let Some(found) = locate_text(&words, &text, case_sensitive) {
            return Ok(Some(found.to_value()));
        }
        if start.elapsed() + interval > timeout {
            return Err(anyhow!(
                "Text '{}' not found within {:.1}s",
                text,
                timeout.as_secs_f64()
            )
            .into());
        }
        std::thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t
5\t1\t1\t1\t1\t1\t10\t20\t40\t12\t96.5\tSave
5\t1\t1\t1\t1\t2\t55\t21\t30\t12\t90.5\tAs
5\t1\t1\t1\t1\t3\t90\t20\t50\t14\t80\tCancel
5\t1\t1\t1\t1\t4\t150\t20\t50\t14\tbad\tBroken";

    #[test]
    fn test_parse_tsv_skips_header_and_blank_rows() {
        let words = parse_tsv(TSV);
        assert_eq!(words.len(), 3);
        assert_eq!(words[0].text, "Save");
        assert_eq!(words[2].confidence, 80.0);
    }

    #[test]
    fn test_locate_multi_word_text() {
        let words = parse_tsv(TSV);
        let found = locate_text(&words, "save as", false).unwrap();
        assert_eq!((found.x, found.y, found.width, found.height), (10, 20, 75, 13));
        assert_eq!(found.confidence, 93.5);
        assert_eq!(found.center(), (47, 26));
    }

    #[test]
    fn test_locate_respects_case() {
        let words = parse_tsv(TSV);
        assert!(locate_text(&words, "cancel", true).is_none());
        assert!(locate_text(&words, "Cancel", true).is_some());
        assert!(locate_text(&words, "missing", false).is_none());
        assert!(locate_text(&words, "  ", false).is_none());
    }
}
