//! The `.ace` wire format: a JSON document carrying a chart's antigens,
//! sera, titers, and projections (§6).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chart::{Antigen, AntigenSerumCommon, Chart, Info, Lineage, Serum};
use crate::column_bases::ColumnBases;
use crate::err::{ErrorKind, Result};
use crate::layout::Layout;
use crate::projection::{Projection, Transformation};
use crate::table_distances::{AvidityAdjusts, DodgyTiterIsRegular};
use crate::titer::Titer;
use crate::titers::Titers;

const VERSION: &str = "acmacs-ace-v1";

/// Strip the emacs indent-hint key, `#`-prefixed line comments, and
/// trailing commas before a document reaches `serde_json`.
fn preprocess(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for line in input.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            continue;
        }
        if let Some(stripped) = strip_line_comment(line) {
            out.push_str(&stripped);
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    strip_indent_hint(&strip_trailing_commas(&out))
}

fn strip_line_comment(line: &str) -> Option<String> {
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '#' if !in_string => return Some(line[..idx].to_string()),
            _ => {}
        }
    }
    None
}

fn strip_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if ch == '"' {
            in_string = true;
            out.push(ch);
            i += 1;
            continue;
        }
        if ch == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == ']' || chars[j] == '}') {
                i += 1;
                continue;
            }
        }
        out.push(ch);
        i += 1;
    }
    out
}

/// Drop the emacs indent-hint member (`"_": "-*- js-indent-level: ... -*-"`)
/// entirely, including its quoted value and whichever adjacent comma would
/// otherwise be left dangling.
fn strip_indent_hint(input: &str) -> String {
    let key = "\"_\"";
    let Some(key_start) = input.find(key) else {
        return input.to_string();
    };
    let after_key = &input[key_start + key.len()..];
    let Some(colon_rel) = after_key.find(':') else {
        return input.to_string();
    };
    let after_colon = &after_key[colon_rel + 1..];
    let Some(value_start_rel) = after_colon.find('"') else {
        return input.to_string();
    };
    let value_start = key_start + key.len() + colon_rel + 1 + value_start_rel;

    let bytes = input.as_bytes();
    let mut i = value_start + 1;
    let mut escaped = false;
    while i < bytes.len() {
        let c = bytes[i];
        if escaped {
            escaped = false;
        } else if c == b'\\' {
            escaped = true;
        } else if c == b'"' {
            break;
        }
        i += 1;
    }
    let mut remove_start = key_start;
    let mut remove_end = (i + 1).min(input.len());

    let after = &input[remove_end..];
    let after_trimmed = after.trim_start();
    if let Some(rest) = after_trimmed.strip_prefix(',') {
        remove_end = input.len() - rest.len();
    } else {
        let before = &input[..remove_start];
        let before_trimmed = before.trim_end();
        if before_trimmed.ends_with(',') {
            remove_start = before_trimmed.len() - 1;
        }
    }

    let mut result = String::with_capacity(input.len());
    result.push_str(&input[..remove_start]);
    result.push_str(&input[remove_end..]);
    result
}

#[derive(Debug, Serialize, Deserialize)]
struct RawInfo {
    #[serde(rename = "v", skip_serializing_if = "Option::is_none")]
    virus: Option<String>,
    #[serde(rename = "V", skip_serializing_if = "Option::is_none")]
    virus_type: Option<String>,
    #[serde(rename = "A", skip_serializing_if = "Option::is_none")]
    assay: Option<String>,
    #[serde(rename = "D", skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    #[serde(rename = "N", skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "l", skip_serializing_if = "Option::is_none")]
    lab: Option<String>,
    #[serde(rename = "r", skip_serializing_if = "Option::is_none")]
    rbc_species: Option<String>,
    #[serde(rename = "s", skip_serializing_if = "Option::is_none")]
    subset: Option<String>,
    #[serde(rename = "S", default, skip_serializing_if = "Vec::is_empty")]
    sources: Vec<RawInfo>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct RawAntigen {
    #[serde(rename = "N", default)]
    name: String,
    #[serde(rename = "D", skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    #[serde(rename = "P", skip_serializing_if = "Option::is_none")]
    passage: Option<String>,
    #[serde(rename = "R", skip_serializing_if = "Option::is_none")]
    reassortant: Option<String>,
    #[serde(rename = "l", default, skip_serializing_if = "Vec::is_empty")]
    lab_ids: Vec<String>,
    #[serde(rename = "S", default, skip_serializing_if = "Vec::is_empty")]
    semantic_flags: Vec<String>,
    #[serde(rename = "a", default, skip_serializing_if = "Vec::is_empty")]
    annotations: Vec<String>,
    #[serde(rename = "c", default, skip_serializing_if = "Vec::is_empty")]
    clades: Vec<String>,
    #[serde(rename = "L", skip_serializing_if = "Option::is_none")]
    lineage: Option<Lineage>,
    #[serde(rename = "C", skip_serializing_if = "Option::is_none")]
    continent: Option<String>,
    #[serde(rename = "A", skip_serializing_if = "Option::is_none")]
    aa: Option<String>,
    #[serde(rename = "B", skip_serializing_if = "Option::is_none")]
    nuc: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct RawSerum {
    #[serde(rename = "N", default)]
    name: String,
    #[serde(rename = "P", skip_serializing_if = "Option::is_none")]
    passage: Option<String>,
    #[serde(rename = "R", skip_serializing_if = "Option::is_none")]
    reassortant: Option<String>,
    #[serde(rename = "I", skip_serializing_if = "Option::is_none")]
    serum_id: Option<String>,
    #[serde(rename = "s", skip_serializing_if = "Option::is_none")]
    serum_species: Option<String>,
    #[serde(rename = "h", default, skip_serializing_if = "Vec::is_empty")]
    homologous_antigens: Vec<usize>,
    #[serde(rename = "S", default, skip_serializing_if = "Vec::is_empty")]
    semantic_flags: Vec<String>,
    #[serde(rename = "a", default, skip_serializing_if = "Vec::is_empty")]
    annotations: Vec<String>,
    #[serde(rename = "c", default, skip_serializing_if = "Vec::is_empty")]
    clades: Vec<String>,
    #[serde(rename = "L", skip_serializing_if = "Option::is_none")]
    lineage: Option<Lineage>,
    #[serde(rename = "C", skip_serializing_if = "Option::is_none")]
    continent: Option<String>,
    #[serde(rename = "A", skip_serializing_if = "Option::is_none")]
    aa: Option<String>,
    #[serde(rename = "B", skip_serializing_if = "Option::is_none")]
    nuc: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct RawTiters {
    #[serde(rename = "l", skip_serializing_if = "Option::is_none")]
    dense: Option<Vec<Vec<String>>>,
    #[serde(rename = "d", skip_serializing_if = "Option::is_none")]
    sparse: Option<Vec<HashMap<String, String>>>,
    #[serde(rename = "L", default, skip_serializing_if = "Vec::is_empty")]
    layers: Vec<Vec<HashMap<String, String>>>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct RawProjection {
    #[serde(rename = "l")]
    layout: Vec<Vec<f64>>,
    #[serde(rename = "s", skip_serializing_if = "Option::is_none")]
    stress: Option<f64>,
    #[serde(rename = "m", default)]
    minimum_column_basis: f64,
    #[serde(rename = "C", skip_serializing_if = "Option::is_none")]
    forced_column_bases: Option<Vec<f64>>,
    #[serde(rename = "t", skip_serializing_if = "Option::is_none")]
    transformation: Option<Vec<f64>>,
    #[serde(rename = "d", default)]
    dodgy_is_regular: bool,
    #[serde(rename = "U", default, skip_serializing_if = "Vec::is_empty")]
    unmovable: Vec<usize>,
    #[serde(rename = "D", default, skip_serializing_if = "Vec::is_empty")]
    disconnected: Vec<usize>,
    #[serde(rename = "u", default, skip_serializing_if = "Vec::is_empty")]
    unmovable_in_last_dimension: Vec<usize>,
    #[serde(rename = "f", default, skip_serializing_if = "Vec::is_empty")]
    avidity_adjusts: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct RawC {
    #[serde(rename = "i", default)]
    info: RawInfo,
    #[serde(rename = "a", default)]
    antigens: Vec<RawAntigen>,
    #[serde(rename = "s", default)]
    sera: Vec<RawSerum>,
    #[serde(rename = "t", default)]
    titers: RawTiters,
    #[serde(rename = "C", skip_serializing_if = "Option::is_none")]
    forced_column_bases: Option<Vec<f64>>,
    #[serde(rename = "P", default, skip_serializing_if = "Vec::is_empty")]
    projections: Vec<RawProjection>,
    #[serde(rename = "p", skip_serializing_if = "Option::is_none")]
    plot_spec: Option<Value>,
}

impl Default for RawInfo {
    fn default() -> Self {
        RawInfo {
            virus: None,
            virus_type: None,
            assay: None,
            date: None,
            name: None,
            lab: None,
            rbc_species: None,
            subset: None,
            sources: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RawDocument {
    #[serde(rename = "  version")]
    version: String,
    c: RawC,
}

fn titer_from_str(s: &str) -> Result<Titer> {
    s.parse()
}

fn parse_titer_map(map: &HashMap<String, String>, num_sera: usize) -> Result<Vec<(usize, Titer)>> {
    let mut row = Vec::with_capacity(map.len());
    for (k, v) in map {
        let idx: usize = k
            .parse()
            .map_err(|_| ErrorKind::InvalidData(format!("bad serum index {k:?}")))?;
        if idx >= num_sera {
            return Err(ErrorKind::InvalidData(format!("serum index {idx} out of range")));
        }
        row.push((idx, titer_from_str(v)?));
    }
    row.sort_by_key(|(idx, _)| *idx);
    Ok(row)
}

/// Parse a `.ace` JSON document into a [`Chart`].
pub fn from_str(input: &str) -> Result<Chart> {
    let cleaned = preprocess(input);
    let doc: RawDocument = serde_json::from_str(&cleaned)
        .map_err(|e| ErrorKind::InvalidData(format!("invalid .ace document: {e}")))?;
    if doc.version != VERSION {
        return Err(ErrorKind::InvalidData(format!(
            "unsupported .ace version {:?}",
            doc.version
        )));
    }
    let c = doc.c;
    let num_antigens = c.antigens.len();
    let num_sera = c.sera.len();

    let titers = if let Some(dense) = &c.titers.dense {
        let mut cells = Vec::with_capacity(num_antigens * num_sera);
        for row in dense {
            for cell in row {
                cells.push(titer_from_str(cell)?);
            }
        }
        Titers::from_dense(num_antigens, num_sera, cells)
    } else if let Some(sparse) = &c.titers.sparse {
        let mut rows = Vec::with_capacity(num_antigens);
        for row in sparse {
            rows.push(parse_titer_map(row, num_sera)?);
        }
        Titers::from_sparse(num_antigens, num_sera, rows)
    } else {
        Titers::new_empty(num_antigens, num_sera)
    };

    let mut titers = titers;
    if !c.titers.layers.is_empty() {
        let mut layers = Vec::with_capacity(c.titers.layers.len());
        for layer in &c.titers.layers {
            let mut rows = vec![Vec::new(); num_antigens];
            for (antigen, row) in layer.iter().enumerate().take(num_antigens) {
                rows[antigen] = parse_titer_map(row, num_sera)?;
            }
            layers.push(rows);
        }
        titers.set_layers(layers);
    }

    let info = info_from_raw(c.info);
    let antigens = c.antigens.into_iter().map(antigen_from_raw).collect();
    let sera = c.sera.into_iter().map(serum_from_raw).collect();

    let mut chart = Chart::new(info, antigens, sera, titers)?;
    if let Some(cb) = c.forced_column_bases {
        chart.forced_column_bases = Some(ColumnBases::from_values(cb));
    }

    let num_points = chart.number_of_points();
    for raw in c.projections {
        chart.projections.push(projection_from_raw(raw, num_points)?);
    }
    Ok(chart)
}

fn info_from_raw(raw: RawInfo) -> Info {
    Info {
        virus: raw.virus,
        virus_type: raw.virus_type,
        assay: raw.assay,
        date: raw.date,
        name: raw.name,
        lab: raw.lab,
        rbc_species: raw.rbc_species,
        subset: raw.subset,
        sources: raw.sources.into_iter().map(info_from_raw).collect(),
    }
}

fn antigen_from_raw(raw: RawAntigen) -> Antigen {
    Antigen {
        name: raw.name,
        date: raw.date,
        lab_ids: raw.lab_ids,
        common: AntigenSerumCommon {
            passage: raw.passage,
            reassortant: raw.reassortant,
            reference: raw.semantic_flags.iter().any(|f| f == "R"),
            egg: raw.semantic_flags.iter().any(|f| f == "E"),
            annotations: raw.annotations,
            clades: raw.clades,
            lineage: raw.lineage,
            continent: raw.continent,
            aa: raw.aa,
            nuc: raw.nuc,
        },
    }
}

fn serum_from_raw(raw: RawSerum) -> Serum {
    Serum {
        name: raw.name,
        serum_id: raw.serum_id,
        serum_species: raw.serum_species,
        homologous_antigens: raw.homologous_antigens,
        common: AntigenSerumCommon {
            passage: raw.passage,
            reassortant: raw.reassortant,
            reference: raw.semantic_flags.iter().any(|f| f == "R"),
            egg: raw.semantic_flags.iter().any(|f| f == "E"),
            annotations: raw.annotations,
            clades: raw.clades,
            lineage: raw.lineage,
            continent: raw.continent,
            aa: raw.aa,
            nuc: raw.nuc,
        },
    }
}

fn projection_from_raw(raw: RawProjection, num_points: usize) -> Result<Projection> {
    let num_dims = raw.layout.first().map(|r| r.len()).unwrap_or(0);
    let mut flat = vec![f64::NAN; num_points * num_dims];
    for (p, row) in raw.layout.iter().enumerate().take(num_points) {
        for (d, v) in row.iter().enumerate().take(num_dims) {
            flat[p * num_dims + d] = *v;
        }
    }
    let layout = Layout::from_flat(num_points, num_dims, flat);

    let mut projection = Projection::new(num_points, num_dims, raw.minimum_column_basis);
    projection.set_layout(layout)?;
    if let Some(stress) = raw.stress {
        projection.set_final_stress(stress);
    }
    if let Some(cb) = raw.forced_column_bases {
        projection.set_forced_column_bases(Some(ColumnBases::from_values(cb)));
    }
    if let Some(matrix) = raw.transformation {
        if matrix.len() == num_dims * num_dims {
            projection.set_transformation(Transformation::from_flat(num_dims, matrix, vec![0.0; num_dims]));
        }
    }
    projection.set_disconnected(raw.disconnected.into_iter().collect());
    projection.set_unmovable(raw.unmovable.into_iter().collect());
    projection.set_unmovable_in_last_dimension(raw.unmovable_in_last_dimension.into_iter().collect());
    projection.set_dodgy_titer_is_regular(if raw.dodgy_is_regular {
        DodgyTiterIsRegular::Yes
    } else {
        DodgyTiterIsRegular::No
    });
    if !raw.avidity_adjusts.is_empty() {
        let mut aa = AvidityAdjusts::none(num_points);
        for (point, value) in raw.avidity_adjusts.into_iter().enumerate() {
            aa.set_logged(point, value);
        }
        projection.set_avidity_adjusts(aa);
    }
    Ok(projection)
}

/// Serialize a [`Chart`] as a `.ace` JSON document. Stress values are
/// rounded to 8 decimal places on export.
pub fn to_string(chart: &Chart) -> Result<String> {
    let num_antigens = chart.number_of_antigens();
    let num_sera = chart.number_of_sera();

    let dense: Vec<Vec<String>> = (0..num_antigens)
        .map(|ag| (0..num_sera).map(|sr| chart.titers.titer(ag, sr).to_string()).collect())
        .collect();

    let projections = chart
        .projections
        .iter()
        .map(|p| raw_projection_from(p))
        .collect();

    let doc = RawDocument {
        version: VERSION.to_string(),
        c: RawC {
            info: raw_info_from(&chart.info),
            antigens: chart.antigens.iter().map(raw_antigen_from).collect(),
            sera: chart.sera.iter().map(raw_serum_from).collect(),
            titers: RawTiters {
                dense: Some(dense),
                sparse: None,
                layers: Vec::new(),
            },
            forced_column_bases: chart
                .forced_column_bases
                .as_ref()
                .map(|cb| cb.as_slice().to_vec()),
            projections,
            plot_spec: None,
        },
    };
    serde_json::to_string_pretty(&doc).map_err(|e| ErrorKind::InvalidData(e.to_string()))
}

fn raw_info_from(info: &Info) -> RawInfo {
    RawInfo {
        virus: info.virus.clone(),
        virus_type: info.virus_type.clone(),
        assay: info.assay.clone(),
        date: info.date.clone(),
        name: info.name.clone(),
        lab: info.lab.clone(),
        rbc_species: info.rbc_species.clone(),
        subset: info.subset.clone(),
        sources: info.sources.iter().map(raw_info_from).collect(),
    }
}

fn semantic_flags(reference: bool, egg: bool) -> Vec<String> {
    let mut flags = Vec::new();
    if reference {
        flags.push("R".to_string());
    }
    if egg {
        flags.push("E".to_string());
    }
    flags
}

fn raw_antigen_from(antigen: &Antigen) -> RawAntigen {
    RawAntigen {
        name: antigen.name.clone(),
        date: antigen.date.clone(),
        passage: antigen.common.passage.clone(),
        reassortant: antigen.common.reassortant.clone(),
        lab_ids: antigen.lab_ids.clone(),
        semantic_flags: semantic_flags(antigen.common.reference, antigen.common.egg),
        annotations: antigen.common.annotations.clone(),
        clades: antigen.common.clades.clone(),
        lineage: antigen.common.lineage,
        continent: antigen.common.continent.clone(),
        aa: antigen.common.aa.clone(),
        nuc: antigen.common.nuc.clone(),
    }
}

fn raw_serum_from(serum: &Serum) -> RawSerum {
    RawSerum {
        name: serum.name.clone(),
        passage: serum.common.passage.clone(),
        reassortant: serum.common.reassortant.clone(),
        serum_id: serum.serum_id.clone(),
        serum_species: serum.serum_species.clone(),
        homologous_antigens: serum.homologous_antigens.clone(),
        semantic_flags: semantic_flags(serum.common.reference, serum.common.egg),
        annotations: serum.common.annotations.clone(),
        clades: serum.common.clades.clone(),
        lineage: serum.common.lineage,
        continent: serum.common.continent.clone(),
        aa: serum.common.aa.clone(),
        nuc: serum.common.nuc.clone(),
    }
}

fn round8(v: f64) -> f64 {
    (v * 1e8).round() / 1e8
}

fn raw_projection_from(projection: &Projection) -> RawProjection {
    let layout = projection.layout();
    let rows: Vec<Vec<f64>> = (0..layout.num_points())
        .map(|p| layout.row(p).to_vec())
        .collect();
    RawProjection {
        layout: rows,
        stress: projection.stress().map(round8),
        minimum_column_basis: projection.minimum_column_basis(),
        forced_column_bases: projection.forced_column_bases().map(|cb| cb.as_slice().to_vec()),
        transformation: Some(projection.transformation().matrix().to_vec()),
        dodgy_is_regular: projection.dodgy_titer_is_regular() == DodgyTiterIsRegular::Yes,
        unmovable: projection.unmovable().iter().copied().collect(),
        disconnected: projection.disconnected().iter().copied().collect(),
        unmovable_in_last_dimension: projection.unmovable_in_last_dimension().iter().copied().collect(),
        avidity_adjusts: (0..layout.num_points())
            .map(|p| projection.avidity_adjusts().logged(p))
            .collect(),
    }
}
