//! End-to-end exports through the built-in PDF paginator.

use std::path::Path;

use snapshot_forge::dom::Tag;
use snapshot_forge::render::AutoPaging;
use snapshot_forge::surface::Surface;
use snapshot_forge::{export_html_file, export_pdf, ExportError, ExportOptions, Page, PdfPaginator};

fn options_in(dir: &Path) -> ExportOptions {
    ExportOptions {
        output_dir: Some(dir.to_path_buf()),
        ..ExportOptions::default()
    }
}

fn assert_pdf(path: &Path) {
    let bytes = std::fs::read(path).expect("output written");
    assert_eq!(&bytes[..5], b"%PDF-", "output should be a PDF");
}

fn long_report(paragraphs: usize) -> String {
    let body: String = (0..paragraphs)
        .map(|i| format!("<p>Paragraph {i}: the quick brown fox jumps over the lazy dog.</p>"))
        .collect();
    format!(r#"<div id="report"><h1>Quarterly report</h1>{body}</div>"#)
}

#[tokio::test]
async fn short_report_is_one_page() {
    let dir = tempfile::tempdir().unwrap();
    let page = Page::from_html(&long_report(3));
    let report = export_pdf(&page, "#report", &options_in(dir.path()), &PdfPaginator)
        .await
        .unwrap();
    assert_eq!(report.page_count, 1);
    assert_eq!(report.path, dir.path().join("document.pdf"));
    assert_pdf(&report.path);
}

#[tokio::test]
async fn long_report_spans_pages() {
    let dir = tempfile::tempdir().unwrap();
    let page = Page::from_html(&long_report(120));
    let report = export_pdf(&page, "#report", &options_in(dir.path()), &PdfPaginator)
        .await
        .unwrap();
    assert!(report.page_count > 1, "got {} page(s)", report.page_count);
    assert_pdf(&report.path);

    let mut off = ExportOptions {
        filename: "single.pdf".into(),
        ..options_in(dir.path())
    };
    off.render.auto_paging = AutoPaging::Off;
    let single = export_pdf(&page, "#report", &off, &PdfPaginator).await.unwrap();
    assert_eq!(single.page_count, 1);
}

#[tokio::test]
async fn canvases_and_images_are_embedded() {
    let dir = tempfile::tempdir().unwrap();
    let chart = Surface::new(8, 8).to_data_url().unwrap();
    let page = Page::from_html(&format!(
        r##"<div id="dash">
              <h2>Dashboard</h2>
              <canvas width="120" height="60" data-fill="#3366cc"></canvas>
              <img src="{chart}" width="40">
              <table><tr><th>Metric</th><th>Value</th></tr><tr><td>Uptime</td><td>99.9%</td></tr></table>
            </div>"##
    ));
    let before = page.with(|doc| doc.node_count());
    let report = export_pdf(&page, "#dash", &options_in(dir.path()), &PdfPaginator)
        .await
        .unwrap();
    assert_eq!(report.surfaces_converted, 1);
    assert_eq!(report.images.loaded, 1);
    assert_eq!(report.images.failed, 0);
    assert_pdf(&report.path);
    assert_eq!(page.with(|doc| doc.node_count()), before);
}

#[tokio::test]
async fn broken_images_do_not_block_the_export() {
    let dir = tempfile::tempdir().unwrap();
    let page = Page::from_html(
        r#"<section id="s"><img src="missing.png"><img><p>still rendered</p></section>"#,
    );
    let options = ExportOptions {
        base_dir: Some(dir.path().to_path_buf()),
        ..options_in(dir.path())
    };
    let report = export_pdf(&page, "#s", &options, &PdfPaginator).await.unwrap();
    assert_eq!(report.images.failed, 2);
    assert_pdf(&report.path);
}

#[tokio::test]
async fn html_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("logo.png"), Surface::new(16, 16).to_png().unwrap()).unwrap();
    let input = dir.path().join("invoice.html");
    std::fs::write(
        &input,
        r#"<!DOCTYPE html>
<html><head><title>Invoice</title><style>p { color: red }</style></head>
<body>
  <div class="invoice" style="padding: 20px">
    <img src="logo.png" alt="logo">
    <h1>Invoice #42</h1>
    <ul><li>Widget &amp; gadget</li><li>Support</li></ul>
  </div>
</body></html>"#,
    )
    .unwrap();

    let options = ExportOptions {
        filename: "invoice.pdf".into(),
        ..options_in(dir.path())
    };
    let report = export_html_file(&input, ".invoice", &options, &PdfPaginator)
        .await
        .unwrap();
    assert_eq!(report.images.loaded, 1);
    assert_eq!(report.path, dir.path().join("invoice.pdf"));
    assert_pdf(&report.path);
}

#[tokio::test]
async fn missing_target_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let page = Page::from_html("<p>nothing to see</p>");
    let err = export_pdf(&page, "#absent", &options_in(dir.path()), &PdfPaginator)
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::TargetNotFound(_)));
    assert!(!dir.path().join("document.pdf").exists());
}

#[tokio::test]
async fn repeated_exports_match() {
    let dir = tempfile::tempdir().unwrap();
    let page = Page::from_html(&long_report(10));
    let first = ExportOptions {
        filename: "one.pdf".into(),
        ..options_in(dir.path())
    };
    let second = ExportOptions {
        filename: "two.pdf".into(),
        ..options_in(dir.path())
    };
    let a = export_pdf(&page, "#report", &first, &PdfPaginator).await.unwrap();
    let b = export_pdf(&page, "#report", &second, &PdfPaginator).await.unwrap();
    assert_eq!(a.page_count, b.page_count);
    assert_eq!(a.images, b.images);
    assert_pdf(&a.path);
    assert_pdf(&b.path);
    let divs = page.with(|doc| doc.elements_by_tag(doc.body(), &Tag::Div).len());
    assert_eq!(divs, 1, "no staged clone left behind");
}

#[tokio::test]
async fn malformed_colours_render_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let page = Page::from_html(
        r#"<div id="r" style="color: #aé; background: #ééé"><p style="border: 1px solid #fé0">text</p></div>"#,
    );
    let report = export_pdf(&page, "#r", &options_in(dir.path()), &PdfPaginator)
        .await
        .unwrap();
    assert_eq!(report.page_count, 1);
    assert_pdf(&report.path);
}
