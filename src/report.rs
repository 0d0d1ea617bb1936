// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! PDF diagnosis report rendering

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use crate::knowledge::DiseaseAdvisory;
use crate::{LeafscanError, Result};

pub const REPORT_TITLE: &str = "Plant Disease Diagnosis Report";

// A4 in points
const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 56;
const TITLE_SIZE: i64 = 16;
const BODY_SIZE: i64 = 12;
const LINE_HEIGHT: i64 = 18;
const WRAP_COLUMNS: usize = 80;

/// Content of one report
#[derive(Debug, Clone)]
pub struct ReportContent<'a> {
    pub prediction: &'a str,
    pub confidence: f32,
    pub advisory: &'a DiseaseAdvisory,
}

impl ReportContent<'_> {
    /// Body lines in reading order, paragraphs already wrapped
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Prediction: {}", self.prediction),
            format!("Confidence: {:.2}", self.confidence),
            format!("Severity: {}", self.advisory.severity),
            String::new(),
        ];
        lines.extend(wrap(&format!("Treatment: {}", self.advisory.treatment), WRAP_COLUMNS));
        lines.push(String::new());
        lines.extend(wrap(&format!("Prevention: {}", self.advisory.prevention), WRAP_COLUMNS));
        lines
    }
}

/// Greedy word wrap; words longer than `columns` get a line of their own
fn wrap(text: &str, columns: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > columns {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn text_line(operations: &mut Vec<Operation>, font: &str, size: i64, y: i64, text: &str) {
    operations.push(Operation::new("BT", vec![]));
    operations.push(Operation::new("Tf", vec![font.into(), size.into()]));
    operations.push(Operation::new("Td", vec![MARGIN.into(), y.into()]));
    operations.push(Operation::new("Tj", vec![Object::string_literal(text)]));
    operations.push(Operation::new("ET", vec![]));
}

/// Render the report as a single-page PDF
pub fn render(content: &ReportContent<'_>) -> Result<Vec<u8>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular_id,
            "F2" => bold_id,
        },
    });

    let mut operations = Vec::new();
    let mut y = PAGE_HEIGHT - MARGIN;
    text_line(&mut operations, "F2", TITLE_SIZE, y, REPORT_TITLE);
    y -= LINE_HEIGHT * 2;

    for line in content.lines() {
        if !line.is_empty() {
            text_line(&mut operations, "F1", BODY_SIZE, y, &line);
        }
        y -= LINE_HEIGHT;
    }

    let encoded = Content { operations }
        .encode()
        .map_err(|e| LeafscanError::Persistence(format!("Failed to encode report content: {}", e)))?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| LeafscanError::Persistence(format!("Failed to write report: {}", e)))?;
    Ok(buffer)
}
