#![cfg(not(tarpaulin_include))]
//! Walks the record stores through a typical season against a scratch data directory.

use farmbook::loader::{self, ImportFormat};
use farmbook::{
    AgronomyFilter, AgronomyPatch, AgronomyStore, Config, FarmReportFilter, FarmReportStore,
    NewFarmReport,
};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Record Store Walkthrough ===\n");

    let dir = tempfile::tempdir()?;
    let config = Config::with_data_dir(dir.path());
    let agronomy = AgronomyStore::new(config.agronomy_file());
    let reports = FarmReportStore::new(config.farm_report_file());

    println!("Test 1: Stores start empty and create their files");
    assert!(agronomy.list(&AgronomyFilter::default())?.is_empty());
    assert!(reports.list()?.is_empty());
    assert!(config.agronomy_file().exists());
    println!("✓ empty stores\n");

    println!("Test 2: Adding spray program rows");
    let first = agronomy.add(AgronomyPatch {
        farm: Some("Kisima".into()),
        greenhouse: Some("GH1".into()),
        week: Some("12".into()),
        monday: Some("Abamectin 0.5ml/L".into()),
        ..Default::default()
    })?;
    let second = agronomy.add(AgronomyPatch {
        farm: Some("Timau".into()),
        greenhouse: Some("GH4".into()),
        ..Default::default()
    })?;
    assert_eq!((first.id, second.id), (1, 2));
    println!("✓ rows {} and {} added\n", first.id, second.id);

    println!("Test 3: Supervisor sign-off");
    let signed = agronomy.patch_supervisor_remarks(first.id, "Approved for Monday")?;
    assert_eq!(signed.supervisor_remarks, "Approved for Monday");
    assert!(agronomy.patch_supervisor_remarks(99, "nope").is_err());
    println!("✓ remarks stored, unknown id refused\n");

    println!("Test 4: Import replaces matching rows but keeps sign-offs");
    let csv = "ID,Farm,GH,Week,Supervisor Remarks\n1,Kisima,GH1,13,\n,Ngare,GH9,13,\n";
    let table = loader::read_table(csv.as_bytes(), ImportFormat::Csv)?;
    let summary = agronomy.import_table(&table)?;
    let rows = agronomy.list(&AgronomyFilter::default())?;
    assert_eq!(rows.len(), 3);
    assert_eq!(summary.inserted, 1);
    assert_eq!(rows[0].supervisor_remarks, "Approved for Monday");
    assert_eq!(rows[0].week, "13");
    println!(
        "✓ {} inserted, {} replaced, {} total\n",
        summary.inserted, summary.replaced, summary.total
    );

    println!("Test 5: Filing farm reports");
    for (weeks, pest_rate) in [("3-5", 2.0), ("1-2", 6.5), ("8", 1.0)] {
        let fields: NewFarmReport = serde_json::from_value(json!({
            "year": 2024,
            "weekRange": weeks,
            "farm": "Kisima",
            "greenhouse": "GH1",
            "pest": "Thrips",
            "pestRate": pest_rate,
        }))?;
        reports.append(fields, Some("scout"))?;
    }
    let missing: NewFarmReport = serde_json::from_value(json!({ "weekRange": "1", "farm": "Kisima" }))?;
    assert!(reports.append(missing, None).is_err());
    println!("✓ three reports filed, incomplete report refused\n");

    println!("Test 6: Searching and charting");
    let filter = FarmReportFilter {
        week_from: Some("2".into()),
        week_to: Some("6".into()),
        ..Default::default()
    };
    let found = reports.search(&filter)?;
    assert_eq!(found.len(), 2);
    let series = reports.chart_series(&filter)?;
    let weeks: Vec<_> = series.iter().map(|r| r.week_range.as_str()).collect();
    assert_eq!(weeks, vec!["1-2", "3-5"]);
    println!("✓ {} reports overlap weeks 2-6, charted in week order\n", found.len());

    println!("=== All store checks passed ===");
    Ok(())
}
