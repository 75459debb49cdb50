//! End-to-end document jobs through the public API

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

use docweave::core::errors::Result;
use docweave::processors::{
    DocxAdapter, HtmlAdapter, PdfAdapter, PptxAdapter, TextAdapter, XlsxAdapter,
};
use docweave::server::service::DocumentService;
use docweave::{
    translate_document, DocumentAdapter, DocumentError, DocumentJob, DocumentOptions, JobStatus,
    PdfOverlayMode, ProgressSink, ServiceConfig, TranslationError, Translator, UsageMetrics,
};

/// Upper-cases its input
struct Shout;

#[async_trait]
impl Translator for Shout {
    async fn translate(&self, text: &str, _: &str, _: &str) -> Result<(String, UsageMetrics)> {
        Ok((
            text.to_uppercase(),
            UsageMetrics {
                input_tokens: 1,
                output_tokens: 1,
                processing_time: 0.01,
                cached: false,
            },
        ))
    }

    fn name(&self) -> String {
        "shout".to_string()
    }
}

/// Returns its input and counts calls; optionally fails on the n-th call
#[derive(Default)]
struct Identity {
    calls: AtomicUsize,
    fail_on: Option<usize>,
}

impl Identity {
    fn failing_on(call: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: Some(call),
        }
    }
}

#[async_trait]
impl Translator for Identity {
    async fn translate(&self, text: &str, _: &str, _: &str) -> Result<(String, UsageMetrics)> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if Some(call) == self.fail_on {
            return Err(TranslationError::Failed(format!("backend down on call {}", call)));
        }
        // let the test observe intermediate states
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok((
            text.to_string(),
            UsageMetrics {
                input_tokens: 3,
                output_tokens: 4,
                processing_time: 0.1,
                cached: false,
            },
        ))
    }

    fn name(&self) -> String {
        "identity".to_string()
    }
}

#[derive(Default)]
struct Recorder {
    reports: Mutex<Vec<(u8, String)>>,
}

impl ProgressSink for Recorder {
    fn report(&self, percent: u8, message: &str) {
        self.reports.lock().push((percent, message.to_string()));
    }
}

impl Recorder {
    fn percents(&self) -> Vec<u8> {
        self.reports.lock().iter().map(|(p, _)| *p).collect()
    }

    fn assert_monotonic(&self) {
        let reports = self.reports.lock();
        assert!(!reports.is_empty());
        for pair in reports.windows(2) {
            assert!(pair[0].0 <= pair[1].0, "progress went backwards: {:?}", pair);
        }
        assert!(reports.iter().all(|(p, _)| *p <= 99));
    }
}

fn zip_package(parts: &[(&str, String)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in parts {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn zip_part(bytes: &[u8], name: &str) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut content = String::new();
    archive
        .by_name(name)
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    content
}

fn texts<A: DocumentAdapter>(bytes: &[u8]) -> Vec<String> {
    A::load(bytes, &DocumentOptions::default())
        .unwrap()
        .units()
        .into_iter()
        .map(|unit| unit.text)
        .collect()
}

async fn identity_roundtrip<A: DocumentAdapter>(bytes: &[u8], filename: &str) -> Vec<u8> {
    let translator = Identity::default();
    let recorder = Recorder::default();
    let (output, metrics) = assert_ok!(
        translate_document(
            bytes,
            filename,
            "en",
            "fr",
            &translator,
            &recorder,
            DocumentOptions::default(),
        )
        .await
    );

    assert_eq!(texts::<A>(&output), texts::<A>(bytes));
    assert_eq!(metrics.total_tokens, metrics.input_tokens + metrics.output_tokens);
    assert!(!metrics.cached);
    recorder.assert_monotonic();
    output
}

fn docx_fixture() -> Vec<u8> {
    let document = concat!(
        r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>"#,
        r#"<w:p><w:r><w:t>Quarterly </w:t></w:r><w:r><w:b/><w:t>report</w:t></w:r></w:p>"#,
        r#"<w:p/>"#,
        r#"<w:tbl><w:tblGrid><w:gridCol/><w:gridCol/></w:tblGrid>"#,
        r#"<w:tr><w:tc><w:p><w:r><w:t>Revenue</w:t></w:r></w:p></w:tc>"#,
        r#"<w:tc><w:p><w:r><w:t>Up</w:t></w:r></w:p><w:p><w:r><w:t>ten percent</w:t></w:r></w:p></w:tc></w:tr>"#,
        r#"</w:tbl><w:sectPr/></w:body></w:document>"#,
    );
    zip_package(&[
        ("[Content_Types].xml", "<Types/>".to_string()),
        ("word/document.xml", document.to_string()),
    ])
}

fn xlsx_fixture() -> Vec<u8> {
    let main = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
    let rel = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
    zip_package(&[
        (
            "xl/workbook.xml",
            format!(
                r#"<workbook xmlns="{}" xmlns:r="{}"><sheets><sheet name="Sales" sheetId="1" r:id="rId1"/><sheet name="Empty" sheetId="2" r:id="rId2"/></sheets></workbook>"#,
                main, rel
            ),
        ),
        (
            "xl/_rels/workbook.xml.rels",
            concat!(
                r#"<Relationships><Relationship Id="rId1" Type="worksheet" Target="worksheets/sheet1.xml"/>"#,
                r#"<Relationship Id="rId2" Type="worksheet" Target="worksheets/sheet2.xml"/></Relationships>"#
            )
            .to_string(),
        ),
        (
            "xl/sharedStrings.xml",
            "<sst><si><t>Region</t></si><si><t>North</t></si></sst>".to_string(),
        ),
        (
            "xl/worksheets/sheet1.xml",
            format!(
                r#"<worksheet xmlns="{}"><sheetData><row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1"><v>7</v></c></row><row r="2"><c r="A2" t="s"><v>1</v></c><c r="B2" t="inlineStr"><is><t>Total</t></is></c></row></sheetData></worksheet>"#,
                main
            ),
        ),
        (
            "xl/worksheets/sheet2.xml",
            format!(r#"<worksheet xmlns="{}"><sheetData><row r="1"><c r="A1"><v>1</v></c></row></sheetData></worksheet>"#, main),
        ),
    ])
}

fn pptx_fixture() -> Vec<u8> {
    let ns = concat!(
        r#"xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" "#,
        r#"xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" "#,
        r#"xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main""#
    );
    let shape = |text: &str| {
        format!(
            r#"<p:sp><p:nvSpPr><p:cNvPr id="2" name="T"/></p:nvSpPr><p:txBody><a:bodyPr/><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp>"#,
            text
        )
    };
    let slide = |shapes: String| {
        format!(
            r#"<p:sld {}><p:cSld><p:spTree><p:nvGrpSpPr/>{}</p:spTree></p:cSld></p:sld>"#,
            ns, shapes
        )
    };
    zip_package(&[
        (
            "ppt/presentation.xml",
            format!(
                r#"<p:presentation {}><p:sldIdLst><p:sldId id="256" r:id="rId2"/><p:sldId id="257" r:id="rId3"/></p:sldIdLst></p:presentation>"#,
                ns
            ),
        ),
        (
            "ppt/_rels/presentation.xml.rels",
            concat!(
                r#"<Relationships><Relationship Id="rId2" Type="slide" Target="slides/slide1.xml"/>"#,
                r#"<Relationship Id="rId3" Type="slide" Target="slides/slide2.xml"/></Relationships>"#
            )
            .to_string(),
        ),
        ("ppt/slides/slide1.xml", slide(format!("{}{}", shape("Agenda"), shape("Welcome")))),
        ("ppt/slides/slide2.xml", slide(shape("Questions"))),
    ])
}

#[tokio::test]
async fn test_docx_identity_roundtrip() {
    let bytes = docx_fixture();
    let output = identity_roundtrip::<DocxAdapter>(&bytes, "report.docx").await;
    assert_eq!(
        texts::<DocxAdapter>(&output),
        vec!["Quarterly report", "", "Revenue", "Up\nten percent"]
    );
    // run formatting survives
    assert!(zip_part(&output, "word/document.xml").contains("<w:b/>"));
}

#[tokio::test]
async fn test_xlsx_identity_roundtrip() {
    let bytes = xlsx_fixture();
    let output = identity_roundtrip::<XlsxAdapter>(&bytes, "sales.xlsx").await;
    assert_eq!(texts::<XlsxAdapter>(&output), vec!["Region", "North", "Total"]);
    // shared strings are never rewritten in place
    assert_eq!(
        zip_part(&output, "xl/sharedStrings.xml"),
        zip_part(&bytes, "xl/sharedStrings.xml")
    );
}

#[tokio::test]
async fn test_pptx_identity_roundtrip() {
    let bytes = pptx_fixture();
    identity_roundtrip::<PptxAdapter>(&bytes, "deck.pptx").await;
}

#[tokio::test]
async fn test_html_identity_roundtrip() {
    let html = b"<html><head><title>Docs</title></head><body><h1>Intro</h1><p>First <b>bold</b></p><li>Item</li></body></html>";
    let output = identity_roundtrip::<HtmlAdapter>(html, "page.htm").await;
    let rendered = String::from_utf8(output).unwrap();
    assert!(rendered.contains("<b>"));
    assert!(rendered.contains("Intro"));
}

#[tokio::test]
async fn test_text_identity_roundtrip() {
    let output = identity_roundtrip::<TextAdapter>(b"One\n\nTwo\n\nThree", "notes.txt").await;
    assert_eq!(output, b"One\n\nTwo\n\nThree");
}

fn pdf_fixture() -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal("Hello there")]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

#[tokio::test]
async fn test_pdf_discard_mode_returns_original_pages() {
    let bytes = pdf_fixture();
    let translator = Identity::default();
    let options = DocumentOptions {
        pdf_overlay: PdfOverlayMode::Discard,
        ..DocumentOptions::default()
    };
    let (output, metrics) = assert_ok!(
        translate_document(&bytes, "scan.pdf", "en", "fr", &translator, &Recorder::default(), options)
            .await
    );
    assert_eq!(output, bytes);
    assert_eq!(translator.calls.load(Ordering::SeqCst), 2);
    assert_eq!(metrics.total_tokens, 14);
}

#[tokio::test]
async fn test_pdf_inject_mode_draws_translations() {
    let bytes = pdf_fixture();
    let recorder = Recorder::default();
    let (output, metrics) = assert_ok!(
        translate_document(
            &bytes,
            "scan.pdf",
            "en",
            "fr",
            &Shout,
            &recorder,
            DocumentOptions::default(),
        )
        .await
    );
    assert_ne!(output, bytes);
    assert_eq!(metrics.total_tokens, 4);
    recorder.assert_monotonic();

    let document = lopdf::Document::load_mem(&output).unwrap();
    let (_, page) = document.get_pages().into_iter().next().unwrap();
    let content = String::from_utf8_lossy(&document.get_page_content(page).unwrap()).into_owned();
    assert!(content.contains("(Hello there) Tj"));
    assert!(content.contains("(HELLO) Tj"));
    assert!(content.contains("(THERE) Tj"));

    // the reparsed page still yields the original words first
    let words = texts::<PdfAdapter>(&output);
    assert_eq!(&words[..2], &["Hello", "there"]);
    assert!(words.contains(&"HELLO".to_string()));
}

#[tokio::test]
async fn test_pptx_progress_with_blank_shapes_and_empty_slides() {
    let ns = concat!(
        r#"xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" "#,
        r#"xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" "#,
        r#"xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main""#
    );
    let text = r#"<p:sp><p:nvSpPr><p:cNvPr id="2" name="T"/></p:nvSpPr><p:txBody><a:bodyPr/><a:p><a:r><a:t>Agenda</a:t></a:r></a:p></p:txBody></p:sp>"#;
    let blank = r#"<p:sp><p:nvSpPr><p:cNvPr id="3" name="Box"/></p:nvSpPr><p:spPr/></p:sp>"#;
    let picture = r#"<p:pic><p:nvPicPr><p:cNvPr id="4" name="Logo"/></p:nvPicPr></p:pic>"#;
    let closing = r#"<p:sp><p:nvSpPr><p:cNvPr id="5" name="T"/></p:nvSpPr><p:txBody><a:bodyPr/><a:p><a:r><a:t>Thanks</a:t></a:r></a:p></p:txBody></p:sp>"#;
    let slide = |shapes: &str| {
        format!(
            r#"<p:sld {}><p:cSld><p:spTree><p:nvGrpSpPr/>{}</p:spTree></p:cSld></p:sld>"#,
            ns, shapes
        )
    };
    let bytes = zip_package(&[
        (
            "ppt/presentation.xml",
            format!(
                r#"<p:presentation {}><p:sldIdLst><p:sldId id="256" r:id="rId1"/><p:sldId id="257" r:id="rId2"/><p:sldId id="258" r:id="rId3"/></p:sldIdLst></p:presentation>"#,
                ns
            ),
        ),
        (
            "ppt/_rels/presentation.xml.rels",
            concat!(
                r#"<Relationships><Relationship Id="rId1" Type="slide" Target="slides/slide1.xml"/>"#,
                r#"<Relationship Id="rId2" Type="slide" Target="slides/slide2.xml"/>"#,
                r#"<Relationship Id="rId3" Type="slide" Target="slides/slide3.xml"/></Relationships>"#
            )
            .to_string(),
        ),
        ("ppt/slides/slide1.xml", slide(&format!("{}{}", text, blank))),
        ("ppt/slides/slide2.xml", slide(picture)),
        ("ppt/slides/slide3.xml", slide(closing)),
    ]);

    let translator = Identity::default();
    let recorder = Recorder::default();
    let job = DocumentJob::new("en", "fr", &translator, &recorder);
    assert_ok!(job.run::<PptxAdapter>(&bytes).await);

    // slides hold 2, 0 and 1 units; the empty slide still gets its third
    assert_eq!(recorder.percents(), vec![16, 33, 66, 99]);
    assert_eq!(recorder.reports.lock()[2].1, "Translating slide 2...");
    recorder.assert_monotonic();
    assert_eq!(translator.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_docx_progress_counts_merged_cells_by_grid_width() {
    let document = concat!(
        r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>"#,
        r#"<w:p><w:r><w:t>Summary</w:t></w:r></w:p>"#,
        r#"<w:tbl><w:tblGrid><w:gridCol/><w:gridCol/><w:gridCol/></w:tblGrid>"#,
        r#"<w:tr><w:tc><w:tcPr><w:gridSpan w:val="2"/></w:tcPr><w:p><w:r><w:t>Merged</w:t></w:r></w:p></w:tc>"#,
        r#"<w:tc><w:p><w:r><w:t>Single</w:t></w:r></w:p></w:tc></w:tr>"#,
        r#"<w:tr><w:tc><w:p><w:r><w:t>Short row</w:t></w:r></w:p></w:tc></w:tr>"#,
        r#"</w:tbl><w:sectPr/></w:body></w:document>"#,
    );
    let bytes = zip_package(&[
        ("[Content_Types].xml", "<Types/>".to_string()),
        ("word/document.xml", document.to_string()),
    ]);

    // 1 paragraph + 2 rows x 3 grid columns
    let adapter = DocxAdapter::load(&bytes, &DocumentOptions::default()).unwrap();
    assert_eq!(adapter.plan().total_units(), 7);

    let recorder = Recorder::default();
    let translator = Identity::default();
    let job = DocumentJob::new("en", "fr", &translator, &recorder);
    assert_ok!(job.run::<DocxAdapter>(&bytes).await);

    assert_eq!(recorder.percents(), vec![14, 42, 57, 99]);
    assert_eq!(translator.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_unsupported_extension_is_rejected_before_parsing() {
    let translator = Identity::default();
    let err = translate_document(
        b"\x00\x01garbage",
        "archive.tar",
        "en",
        "fr",
        &translator,
        &Recorder::default(),
        DocumentOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, DocumentError::UnsupportedFormat { .. }));
    assert_eq!(translator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failure_on_third_unit_ends_in_error() {
    let paragraphs: Vec<String> = (1..=10).map(|i| format!("Paragraph {}", i)).collect();
    let service = DocumentService::new(
        Arc::new(Identity::failing_on(3)),
        ServiceConfig::default(),
    );
    let task = service
        .submit(paragraphs.join("\n\n").into_bytes(), "long.txt", "en", "fr")
        .unwrap();

    let mut rx = service.registry().subscribe(&task.task_id).unwrap();
    let mut seen = vec![rx.borrow_and_update().clone()];
    while !seen.last().map(|s| s.status.is_terminal()).unwrap_or(false) {
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .unwrap()
            .unwrap();
        seen.push(rx.borrow_and_update().clone());
    }

    assert!(seen.iter().all(|s| s.status != JobStatus::Completed));
    let last = seen.last().unwrap();
    assert_eq!(last.status, JobStatus::Error);
    assert_eq!(last.progress, 0);
    assert!(last.metrics.is_none());
    assert!(last.download_url.is_none());
    assert!(last.message.contains("backend down on call 3"));
    assert!(matches!(
        service.registry().take_output(&task.task_id),
        Err(DocumentError::NotFound { .. })
    ));
}
