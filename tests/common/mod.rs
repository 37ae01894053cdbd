// tests/common/mod.rs
//
// Synthetic xlsx fixtures: just enough of the OOXML container for calamine
// to read sheet names, inline strings, and numbers.
#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::{ExtendedFileOptions, FileOptions};
use zip::{CompressionMethod, ZipWriter};

/// One fixture cell.
#[derive(Clone)]
pub enum Cell {
    Str(String),
    Num(f64),
    Empty,
}

pub fn s(text: &str) -> Cell {
    Cell::Str(text.to_string())
}

pub fn n(value: f64) -> Cell {
    Cell::Num(value)
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn col_ref(column: usize) -> String {
    let mut letters = String::new();
    let mut c = column as u32 + 1;
    while c > 0 {
        c -= 1;
        letters.insert(0, char::from_u32(65 + c % 26).unwrap());
        c /= 26;
    }
    letters
}

fn sheet_xml(rows: &[Vec<Cell>]) -> String {
    let mut body = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (r, row) in rows.iter().enumerate() {
        body.push_str(&format!(r#"<row r="{}">"#, r + 1));
        for (c, cell) in row.iter().enumerate() {
            let pos = format!("{}{}", col_ref(c), r + 1);
            match cell {
                Cell::Str(text) => body.push_str(&format!(
                    r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#,
                    pos,
                    xml_escape(text)
                )),
                Cell::Num(value) => {
                    body.push_str(&format!(r#"<c r="{}"><v>{}</v></c>"#, pos, value))
                }
                Cell::Empty => {}
            }
        }
        body.push_str("</row>");
    }
    body.push_str("</sheetData></worksheet>");
    body
}

/// Write a workbook with the given `(sheet name, rows)` pairs. A sheet with
/// no rows comes out genuinely empty, which the extractor treats as
/// malformed.
pub fn write_xlsx(path: &Path, sheets: &[(&str, Vec<Vec<Cell>>)]) {
    let file = File::create(path).expect("create fixture file");
    let mut zip = ZipWriter::new(file);
    let options = || {
        FileOptions::<ExtendedFileOptions>::default()
            .compression_method(CompressionMethod::Stored)
    };

    let mut content_types = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
    );
    for index in 0..sheets.len() {
        content_types.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
            index + 1
        ));
    }
    content_types.push_str("</Types>");
    zip.start_file("[Content_Types].xml", options()).unwrap();
    zip.write_all(content_types.as_bytes()).unwrap();

    zip.start_file("_rels/.rels", options()).unwrap();
    zip.write_all(
        br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
</Relationships>"#,
    )
    .unwrap();

    let mut workbook = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
    );
    for (index, (name, _)) in sheets.iter().enumerate() {
        workbook.push_str(&format!(
            r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
            xml_escape(name),
            index + 1,
            index + 1
        ));
    }
    workbook.push_str("</sheets></workbook>");
    zip.start_file("xl/workbook.xml", options()).unwrap();
    zip.write_all(workbook.as_bytes()).unwrap();

    let mut rels = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    for index in 0..sheets.len() {
        rels.push_str(&format!(
            r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
            index + 1,
            index + 1
        ));
    }
    rels.push_str("</Relationships>");
    zip.start_file("xl/_rels/workbook.xml.rels", options()).unwrap();
    zip.write_all(rels.as_bytes()).unwrap();

    for (index, (_, rows)) in sheets.iter().enumerate() {
        zip.start_file(format!("xl/worksheets/sheet{}.xml", index + 1), options())
            .unwrap();
        zip.write_all(sheet_xml(rows).as_bytes()).unwrap();
    }

    zip.finish().unwrap();
}
