mod common;

use std::collections::HashMap;

use common::{diagonal, horizontal_split, png, url, vertical_split, Harness};
use image::ImageFormat;
use rehost::fetch::FetchError;
use rehost::library::AssetLibrary;
use rehost::model::NewAsset;
use rehost::{Decision, DocId, Error, Fingerprint, ImportOutcome, OutcomeKey, OutcomeKind};

const DOC: DocId = DocId(1);

fn kinds(report: &rehost::BatchReport) -> Vec<&'static str> {
    report.outcomes().map(|o| o.kind()).collect()
}

#[tokio::test]
async fn one_failed_fetch_does_not_block_the_others() {
    let h = Harness::new().await;
    h.fetcher
        .serve(url("a"), png(vertical_split()))
        .fail(url("b"), FetchError::Status(503))
        .serve(url("c"), png(diagonal()));
    let doc = format!(
        r#"<p><img src="{}"></p><p><img src="{}"></p><p><img src="{}"></p>"#,
        url("a"),
        url("b"),
        url("c")
    );
    h.documents.insert(DOC, doc);

    let importer = h.importer().await;
    importer.scan().await.unwrap();
    let report = importer.import_document(DOC, &HashMap::new()).await.unwrap();

    assert_eq!(kinds(&report), ["imported", "failed", "imported"]);
    assert_eq!((report.imported, report.reused, report.failed), (2, 0, 1));
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, url("b"));

    let saved = h.documents.get(DOC).unwrap();
    assert_eq!(h.documents.saves(DOC), 1);
    assert_eq!(saved.matches(r#"<img src="/uploads/imported_image"#).count(), 2);
    assert!(saved.contains(r#".jpg" width="8" height="8">"#));
    assert!(saved.contains(r#".jpg" width="16" height="16">"#));
    assert!(saved.contains(&format!(r#"<img src="{}">"#, url("b"))));
    assert!(!saved.contains(&url("a")));
}

#[tokio::test]
async fn file_names_follow_precedence() {
    let h = Harness::new().await;
    h.fetcher
        .serve(url("p/one.png"), png(vertical_split()))
        .serve(url("p/two.png"), png(horizontal_split()))
        .serve(url("p/three.png"), png(diagonal()));
    h.documents.insert(
        DOC,
        format!(
            r#"<img src="{}" alt="Banner"><img src="{}" alt="Banner"><img src="{}">"#,
            url("p/one.png"),
            url("p/two.png"),
            url("p/three.png")
        ),
    );

    let importer = h.importer().await;
    importer.scan().await.unwrap();
    let names = HashMap::from([(0, "logo".to_string())]);
    let report = importer.import_document(DOC, &names).await.unwrap();

    let files: Vec<String> = report
        .outcomes()
        .map(|o| match o {
            ImportOutcome::Imported { asset, .. } => asset.file_name.clone(),
            other => panic!("unexpected outcome {other:?}"),
        })
        .collect();
    assert_eq!(files, ["logo.png", "banner.png", "imported_image.png"]);
}

#[tokio::test]
async fn unsupported_extension_is_stored_as_jpg() {
    let h = Harness::new().await;
    h.fetcher.serve(url("scan.bmp"), common::encode(vertical_split(), ImageFormat::Bmp));
    h.documents.insert(DOC, format!(r#"<img src="{}" alt="Scan">"#, url("scan.bmp")));

    let importer = h.importer().await;
    let scan = importer.scan().await.unwrap();
    assert_eq!(scan.documents[0].images[0].image.extension, "bmp");

    let report = importer.import_document(DOC, &HashMap::new()).await.unwrap();
    match report.outcomes().next().unwrap() {
        ImportOutcome::Imported { asset, .. } => assert_eq!(asset.file_name, "scan.jpg"),
        other => panic!("unexpected outcome {other:?}"),
    };
}

#[tokio::test]
async fn only_the_matched_fragment_is_rewritten() {
    let h = Harness::new().await;
    let src = url("shared");
    h.fetcher.serve(src.clone(), png(vertical_split()));
    let second = format!(r#"<img alt="second" src="{src}">"#);
    h.documents.insert(DOC, format!(r#"<img src="{src}" alt="first"><div>{second}</div>"#));

    let importer = h.importer().await;
    importer.scan().await.unwrap();
    let report = importer.import_image(DOC, 0, None).await.unwrap();
    assert_eq!(kinds(&report), ["imported"]);

    let saved = h.documents.get(DOC).unwrap();
    assert!(saved.starts_with(r#"<img src="/uploads/first.jpg" width="8" height="8" alt="first">"#));
    assert!(saved.contains(&second));
}

#[tokio::test]
async fn known_fingerprint_is_reused_not_imported() {
    let h = Harness::new().await;
    let existing = h
        .library
        .store(NewAsset {
            stem: "existing".into(),
            extension: "png".into(),
            bytes: png(vertical_split()),
            width: Some(8),
            height: Some(8),
            alt_text: String::new(),
            source_url: String::new(),
            doc: None,
        })
        .await
        .unwrap();

    h.fetcher.serve(url("dup"), png(vertical_split()));
    h.documents.insert(DOC, format!(r#"<img src="{}" alt="x" width="8" height="8">"#, url("dup")));

    let importer = h.importer().await;
    let first = importer.scan().await.unwrap();
    let image = &first.documents[0].images[0];
    assert_eq!(image.decision(), Decision::Reuse(existing.id));

    let second = importer.scan().await.unwrap();
    assert_eq!(second.documents[0].images[0].decision(), image.decision());
    assert_ne!(first.scan_id, second.scan_id);

    let report = importer.import_document(DOC, &HashMap::new()).await.unwrap();
    assert_eq!(kinds(&report), ["reused"]);
    assert_eq!(h.library.assets().await.unwrap().len(), 1);
    assert_eq!(
        h.documents.get(DOC).unwrap(),
        r#"<img src="/uploads/existing.png" alt="x" width="8" height="8">"#
    );
}

#[tokio::test]
async fn identical_images_in_one_batch_import_once() {
    let h = Harness::new().await;
    h.fetcher
        .serve(url("copy-1"), png(vertical_split()))
        .serve(url("copy-2"), png(vertical_split()));
    h.documents.insert(DOC, format!(r#"<img src="{}"><img src="{}">"#, url("copy-1"), url("copy-2")));

    let importer = h.importer().await;
    let scan = importer.scan().await.unwrap();
    assert!(scan.documents[0].images.iter().all(|i| i.decision() == Decision::NeedsImport));

    let report = importer.import_document(DOC, &HashMap::new()).await.unwrap();
    assert_eq!((report.imported, report.reused, report.failed), (1, 1, 0));
    assert_eq!(h.library.assets().await.unwrap().len(), 1);

    let saved = h.documents.get(DOC).unwrap();
    assert_eq!(saved.matches("/uploads/imported_image.jpg").count(), 2);
}

#[tokio::test]
async fn sample_document_end_to_end() {
    let h = Harness::new().await;
    let src = "https://lh3.googleusercontent.com/abc123=w400";
    h.fetcher.serve(src, png(vertical_split()));
    h.documents.insert(DOC, format!(r#"<p>Intro</p><img src="{src}"><p>Outro</p>"#));

    let importer = h.importer().await;
    let scan = importer.scan().await.unwrap();
    let expected: Fingerprint = "f0f0f0f0f0f0f0f0".parse().unwrap();
    let image = &scan.documents[0].images[0];
    assert_eq!(image.fingerprint, Some(expected));
    assert_eq!(image.matched_asset, None);
    assert_eq!(image.image.extension, "jpg");

    let report = importer.import_document(DOC, &HashMap::new()).await.unwrap();
    let asset = match report.outcomes().next().unwrap() {
        ImportOutcome::Imported { asset, old_url, .. } => {
            assert_eq!(old_url, src);
            asset.clone()
        }
        other => panic!("unexpected outcome {other:?}"),
    };
    assert_eq!(asset.fingerprint, Some(expected));
    assert_eq!(asset.file_name, "imported_image.jpg");
    assert_eq!(h.library.get(asset.id).await.unwrap().unwrap().fingerprint, Some(expected));
    assert_eq!(importer.index().lookup(expected).await, Some(asset.id));
}

#[tokio::test]
async fn stored_outcomes_are_read_once() {
    let h = Harness::new().await;
    h.fetcher.serve(url("a"), png(vertical_split()));
    h.documents.insert(DOC, format!(r#"<img src="{}">"#, url("a")));

    let importer = h.importer().await;
    importer.scan().await.unwrap();
    let report = importer.import_document(DOC, &HashMap::new()).await.unwrap();

    let key = OutcomeKey::new(OutcomeKind::Batch, DOC);
    assert!(importer.take_report(OutcomeKey::new(OutcomeKind::Single, DOC)).await.unwrap().is_none());
    assert_eq!(importer.take_report(key).await.unwrap(), Some(report));
    assert_eq!(importer.take_report(key).await.unwrap(), None);
}

#[tokio::test]
async fn relink_needs_a_matching_asset() {
    let h = Harness::new().await;
    h.fetcher
        .serve(url("a"), png(vertical_split()))
        .serve(url("b"), png(vertical_split()));
    h.documents.insert(DOC, format!(r#"<img src="{}">"#, url("a")));
    h.documents.insert(DocId(2), format!(r#"<img src="{}">"#, url("b")));

    let importer = h.importer().await;
    importer.scan().await.unwrap();
    assert!(matches!(importer.relink_image(DOC, 0).await, Err(Error::InvalidInput(_))));

    importer.import_document(DOC, &HashMap::new()).await.unwrap();
    importer.scan().await.unwrap();
    let report = importer.relink_image(DocId(2), 0).await.unwrap();
    assert_eq!(kinds(&report), ["reused"]);
    assert_eq!(h.documents.get(DocId(2)).unwrap(), r#"<img src="/uploads/imported_image.jpg">"#);

    let stored = importer.take_report(OutcomeKey::new(OutcomeKind::Update, DocId(2))).await.unwrap();
    assert_eq!(stored, Some(report));
}

#[tokio::test]
async fn edited_document_fails_instead_of_importing() {
    let h = Harness::new().await;
    h.fetcher.serve(url("a"), png(vertical_split()));
    h.documents.insert(DOC, format!(r#"<img src="{}">"#, url("a")));

    let importer = h.importer().await;
    importer.scan().await.unwrap();
    h.documents.insert(DOC, "<p>rewritten by hand</p>");

    let report = importer.import_document(DOC, &HashMap::new()).await.unwrap();
    assert_eq!(kinds(&report), ["failed"]);
    assert_eq!(h.documents.saves(DOC), 0);
    assert!(h.library.assets().await.unwrap().is_empty());
}

#[tokio::test]
async fn unscanned_documents_and_bad_indexes() {
    let h = Harness::new().await;
    h.documents.insert(DOC, "<p>no images</p>");

    let importer = h.importer().await;
    let scan = importer.scan().await.unwrap();
    assert!(scan.documents.is_empty());

    let report = importer.import_document(DOC, &HashMap::new()).await.unwrap();
    assert!(report.is_empty());
    assert!(matches!(importer.import_image(DOC, 3, None).await, Err(Error::InvalidInput(_))));
    assert!(matches!("doc-1".parse::<DocId>(), Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn undecodable_bytes_fail_without_storing() {
    let h = Harness::new().await;
    h.fetcher
        .serve(url("junk"), b"garbage".to_vec())
        .serve(url("ok"), png(vertical_split()));
    let original = format!(r#"<img src="{}" alt="Junk"><img src="{}" alt="Ok">"#, url("junk"), url("ok"));
    h.documents.insert(DOC, original.clone());

    let importer = h.importer().await;
    let scan = importer.scan().await.unwrap();
    assert_eq!(scan.documents[0].images[0].decision(), Decision::NeedsImport);

    let report = importer.import_image(DOC, 0, None).await.unwrap();
    assert_eq!(kinds(&report), ["failed"]);
    let (failed_url, reason) = report.failures().next().unwrap();
    assert_eq!(failed_url, url("junk"));
    assert!(reason.contains("decoded"), "{reason}");
    assert!(h.library.assets().await.unwrap().is_empty());
    assert!(importer.index().is_empty().await);
    assert_eq!(h.documents.get(DOC).unwrap(), original);
    assert_eq!(h.documents.saves(DOC), 0);
}
