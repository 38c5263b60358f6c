//! Plain-text and CSV renderings of a chart, independent of the `.ace`
//! wire format.

use std::fmt::Write as _;

use crate::chart::Chart;

/// A human-readable summary: info, antigen/serum counts, and (if present)
/// the best projection's stress.
pub fn to_text(chart: &Chart) -> String {
    let mut out = String::new();
    if let Some(name) = &chart.info.name {
        let _ = writeln!(out, "Name: {name}");
    }
    if let Some(virus) = &chart.info.virus {
        let _ = writeln!(out, "Virus: {virus}");
    }
    let _ = writeln!(
        out,
        "Antigens: {}  Sera: {}",
        chart.number_of_antigens(),
        chart.number_of_sera()
    );
    if let Some(best) = chart.projections.best() {
        match best.stress() {
            Some(stress) => {
                let _ = writeln!(out, "Best projection: {}D, stress {stress:.5}", best.num_dims());
            }
            None => {
                let _ = writeln!(out, "Best projection: {}D, stress not computed", best.num_dims());
            }
        }
    } else {
        let _ = writeln!(out, "No projections");
    }
    out
}

/// A CSV titer table: one row per antigen, one column per serum, plus a
/// header row of serum names and a leading column of antigen names.
pub fn to_csv_titers(chart: &Chart) -> String {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec!["antigen".to_string()];
    header.extend(chart.sera.iter().map(|s| s.name.clone()));
    writer.write_record(&header).expect("writing to an in-memory buffer cannot fail");

    for (ag_idx, antigen) in chart.antigens.iter().enumerate() {
        let mut record = vec![antigen.name.clone()];
        record.extend(
            (0..chart.number_of_sera()).map(|sr_idx| chart.titers.titer(ag_idx, sr_idx).to_string()),
        );
        writer.write_record(&record).expect("writing to an in-memory buffer cannot fail");
    }

    let bytes = writer.into_inner().expect("in-memory buffer flush cannot fail");
    String::from_utf8(bytes).expect("csv writer only emits UTF-8 given UTF-8 input")
}
