//! VRT mosaic manifests.
//!
//! A manifest references an ordered list of single-band rasters placed on
//! the union of their extents, with a no-data value honored on both the
//! sources and the mosaic. Rendering is deterministic: the same sources in
//! the same order produce byte-identical XML. The in-memory backend writes
//! and composes these manifests; the GDAL backend leaves mosaicking to
//! GDAL's BuildVRT. `mosaic_files` serves both.
use std::path::{Path, PathBuf};

use ndarray::Array2;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use tracing::debug;

use crate::core::catalog::Metric;
use crate::core::tiles::Tile;
use crate::error::{Error, Result};
use crate::io::raster::{GeoReference, RasterInfo, SampleType};

/// Destination window of a source inside the mosaic, in mosaic pixels.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Window {
    pub x_off: usize,
    pub y_off: usize,
    pub x_size: usize,
    pub y_size: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MosaicSource {
    pub path: PathBuf,
    pub cols: usize,
    pub rows: usize,
    pub sample_type: SampleType,
    pub window: Window,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MosaicLayout {
    pub cols: usize,
    pub rows: usize,
    pub sample_type: SampleType,
    pub georef: GeoReference,
    pub sources: Vec<MosaicSource>,
}

impl MosaicLayout {
    /// Place sources on the union of their extents, at the resolution of
    /// the first source. Sources must be north-up.
    pub fn plan(sources: &[(PathBuf, RasterInfo)]) -> Result<MosaicLayout> {
        let (_, first) = sources
            .first()
            .ok_or_else(|| Error::Processing("mosaic needs at least one source".into()))?;
        let dx = first.georef.pixel_width();
        let dy = first.georef.pixel_height();
        if !(dx > 0.0 && dy < 0.0) {
            return Err(Error::Processing(format!(
                "mosaic sources must be north-up, got pixel size {dx} x {dy}"
            )));
        }

        let mut min_x = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for (path, info) in sources {
            let gt = info.georef.geotransform;
            if gt[2] != 0.0 || gt[4] != 0.0 {
                return Err(Error::Processing(format!("rotated raster not supported: {:?}", path)));
            }
            let x0 = gt[0];
            let x1 = gt[0] + info.cols as f64 * gt[1];
            let y0 = gt[3];
            let y1 = gt[3] + info.rows as f64 * gt[5];
            min_x = min_x.min(x0.min(x1));
            max_x = max_x.max(x0.max(x1));
            min_y = min_y.min(y0.min(y1));
            max_y = max_y.max(y0.max(y1));
        }

        let cols = ((max_x - min_x) / dx).round() as usize;
        let rows = ((max_y - min_y) / -dy).round() as usize;

        let placed = sources
            .iter()
            .map(|(path, info)| {
                let gt = info.georef.geotransform;
                MosaicSource {
                    path: path.clone(),
                    cols: info.cols,
                    rows: info.rows,
                    sample_type: info.sample_type,
                    window: Window {
                        x_off: ((gt[0] - min_x) / dx).round() as usize,
                        y_off: ((max_y - gt[3]) / -dy).round() as usize,
                        x_size: (info.cols as f64 * gt[1] / dx).round() as usize,
                        y_size: (info.rows as f64 * gt[5] / dy).round() as usize,
                    },
                }
            })
            .collect();

        Ok(MosaicLayout {
            cols,
            rows,
            sample_type: first.sample_type,
            georef: GeoReference {
                geotransform: [min_x, dx, 0.0, max_y, 0.0, dy],
                projection: first.georef.projection.clone(),
            },
            sources: placed,
        })
    }

    /// Paste source grids (in layout order) onto the mosaic grid. Later
    /// sources win where they hold data, as GDAL resolves VRT overlaps.
    pub fn compose(&self, grids: &[Array2<f32>], nodata: f32) -> Result<Array2<f32>> {
        if grids.len() != self.sources.len() {
            return Err(Error::Processing(format!(
                "expected {} source grids, got {}",
                self.sources.len(),
                grids.len()
            )));
        }
        let mut out = Array2::from_elem((self.rows, self.cols), nodata);
        for (source, grid) in self.sources.iter().zip(grids) {
            let w = source.window;
            let (src_rows, src_cols) = grid.dim();
            for r in 0..w.y_size {
                let dst_r = w.y_off + r;
                if dst_r >= self.rows {
                    break;
                }
                let src_r = r * src_rows / w.y_size.max(1);
                for c in 0..w.x_size {
                    let dst_c = w.x_off + c;
                    if dst_c >= self.cols {
                        break;
                    }
                    let src_c = c * src_cols / w.x_size.max(1);
                    let v = grid[[src_r, src_c]];
                    if v != nodata {
                        out[[dst_r, dst_c]] = v;
                    }
                }
            }
        }
        Ok(out)
    }
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

fn start<W: std::io::Write>(w: &mut Writer<W>, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
    let elem = BytesStart::new(name).with_attributes(attrs.iter().copied());
    w.write_event(Event::Start(elem))?;
    Ok(())
}

fn end<W: std::io::Write>(w: &mut Writer<W>, name: &str) -> Result<()> {
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn empty<W: std::io::Write>(w: &mut Writer<W>, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
    let elem = BytesStart::new(name).with_attributes(attrs.iter().copied());
    w.write_event(Event::Empty(elem))?;
    Ok(())
}

fn text_element<W: std::io::Write>(
    w: &mut Writer<W>,
    name: &str,
    attrs: &[(&str, &str)],
    text: &str,
) -> Result<()> {
    start(w, name, attrs)?;
    w.write_event(Event::Text(BytesText::new(text)))?;
    end(w, name)
}

/// Source path as written in the manifest: relative when the source lives
/// under the manifest's directory.
fn source_reference(source: &Path, vrt_path: &Path) -> (String, &'static str) {
    if let Some(dir) = vrt_path.parent() {
        if !dir.as_os_str().is_empty() {
            if let Ok(rel) = source.strip_prefix(dir) {
                return (rel.to_string_lossy().into_owned(), "1");
            }
        }
    }
    (source.to_string_lossy().into_owned(), "0")
}

/// Render the GDAL VRT XML for `layout`, to be stored at `vrt_path`.
pub fn render_vrt(layout: &MosaicLayout, nodata: f64, vrt_path: &Path) -> Result<String> {
    let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
    let nodata_text = format_number(nodata);

    let (cols, rows) = (layout.cols.to_string(), layout.rows.to_string());
    start(&mut w, "VRTDataset", &[("rasterXSize", &cols), ("rasterYSize", &rows)])?;
    if !layout.georef.projection.is_empty() {
        text_element(&mut w, "SRS", &[], &layout.georef.projection)?;
    }
    let gt = layout
        .georef
        .geotransform
        .iter()
        .map(|v| format!("{:.16e}", v))
        .collect::<Vec<_>>()
        .join(", ");
    text_element(&mut w, "GeoTransform", &[], &gt)?;

    start(
        &mut w,
        "VRTRasterBand",
        &[("dataType", layout.sample_type.gdal_name()), ("band", "1")],
    )?;
    text_element(&mut w, "NoDataValue", &[], &nodata_text)?;
    for source in &layout.sources {
        let (reference, relative) = source_reference(&source.path, vrt_path);
        let (src_cols, src_rows) = (source.cols.to_string(), source.rows.to_string());
        let win = source.window;
        let (x_off, y_off, x_size, y_size) = (
            win.x_off.to_string(),
            win.y_off.to_string(),
            win.x_size.to_string(),
            win.y_size.to_string(),
        );

        start(&mut w, "ComplexSource", &[])?;
        text_element(&mut w, "SourceFilename", &[("relativeToVRT", relative)], &reference)?;
        text_element(&mut w, "SourceBand", &[], "1")?;
        empty(
            &mut w,
            "SourceProperties",
            &[
                ("RasterXSize", &src_cols),
                ("RasterYSize", &src_rows),
                ("DataType", source.sample_type.gdal_name()),
            ],
        )?;
        empty(
            &mut w,
            "SrcRect",
            &[("xOff", "0"), ("yOff", "0"), ("xSize", &src_cols), ("ySize", &src_rows)],
        )?;
        empty(
            &mut w,
            "DstRect",
            &[("xOff", &x_off), ("yOff", &y_off), ("xSize", &x_size), ("ySize", &y_size)],
        )?;
        text_element(&mut w, "NODATA", &[], &nodata_text)?;
        end(&mut w, "ComplexSource")?;
    }
    end(&mut w, "VRTRasterBand")?;
    end(&mut w, "VRTDataset")?;

    let mut xml = String::from_utf8(w.into_inner()).map_err(Error::external)?;
    xml.push('\n');
    Ok(xml)
}

/// Plan, render and store a manifest; returns the layout.
pub fn write_vrt(sources: &[(PathBuf, RasterInfo)], nodata: f64, vrt_path: &Path) -> Result<MosaicLayout> {
    let layout = MosaicLayout::plan(sources)?;
    let xml = render_vrt(&layout, nodata, vrt_path)?;
    std::fs::write(vrt_path, xml)?;
    debug!("Wrote VRT {:?} with {} sources", vrt_path, layout.sources.len());
    Ok(layout)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

/// Per-tile rasters of `metric` under `root/{tile}/`, matching
/// `{tile}_*{metric}.tif`. Sorted lexicographically and deduplicated.
pub fn mosaic_files(tiles: &[Tile], metric: &Metric, root: &Path) -> Result<Vec<PathBuf>> {
    let suffix = format!("{}.tif", metric.name());
    let mut files = Vec::new();
    for tile in tiles {
        let dir = root.join(tile.name());
        if !dir.is_dir() {
            continue;
        }
        let prefix = format!("{}_", tile.name());
        let mut candidates = Vec::new();
        collect_files(&dir, &mut candidates)?;
        files.extend(candidates.into_iter().filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(&suffix) && n.len() >= prefix.len() + suffix.len())
        }));
    }
    files.sort();
    files.dedup();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::catalog;
    use ndarray::array;

    fn info(origin: (f64, f64), size: (usize, usize)) -> RasterInfo {
        RasterInfo {
            cols: size.0,
            rows: size.1,
            sample_type: SampleType::U8,
            georef: GeoReference {
                geotransform: [origin.0, 0.25, 0.0, origin.1, 0.0, -0.25],
                projection: "EPSG:4326".into(),
            },
            nodata: Some(0.0),
        }
    }

    fn two_tiles(root: &Path) -> Vec<(PathBuf, RasterInfo)> {
        vec![
            (root.join("N71W084/N71W084_winter_vv_COH12.tif"), info((-84.0, 71.0), (4, 4))),
            (root.join("N71W083/N71W083_winter_vv_COH12.tif"), info((-83.0, 71.0), (4, 4))),
        ]
    }

    #[test]
    fn layout_spans_union_of_sources() {
        let layout = MosaicLayout::plan(&two_tiles(Path::new("/cache"))).unwrap();
        assert_eq!((layout.cols, layout.rows), (8, 4));
        assert_eq!(layout.georef.geotransform, [-84.0, 0.25, 0.0, 71.0, 0.0, -0.25]);
        assert_eq!(layout.sources[1].window, Window { x_off: 4, y_off: 0, x_size: 4, y_size: 4 });
    }

    #[test]
    fn manifest_is_deterministic_and_relative_under_vrt_dir() {
        let sources = two_tiles(Path::new("/cache"));
        let layout = MosaicLayout::plan(&sources).unwrap();
        let a = render_vrt(&layout, 0.0, Path::new("/cache/region_winter_vv_COH12.vrt")).unwrap();
        let b = render_vrt(&MosaicLayout::plan(&sources).unwrap(), 0.0, Path::new("/cache/region_winter_vv_COH12.vrt")).unwrap();
        assert_eq!(a, b);
        assert!(a.contains(r#"<SourceFilename relativeToVRT="1">N71W084/N71W084_winter_vv_COH12.tif</SourceFilename>"#));
        assert!(a.contains("<NoDataValue>0</NoDataValue>"));
        assert!(a.contains("<NODATA>0</NODATA>"));
        assert!(a.contains(r#"<DstRect xOff="4" yOff="0" xSize="4" ySize="4"/>"#));

        let elsewhere = render_vrt(&layout, 0.0, Path::new("/out/region.vrt")).unwrap();
        assert!(elsewhere.contains(r#"relativeToVRT="0">/cache/N71W084"#));
    }

    #[test]
    fn compose_lets_later_sources_fill_data() {
        let sources = vec![
            (PathBuf::from("a.tif"), info((0.0, 1.0), (2, 2))),
            (PathBuf::from("b.tif"), info((0.25, 1.0), (2, 2))),
        ];
        let layout = MosaicLayout::plan(&sources).unwrap();
        let out = layout
            .compose(&[array![[1.0, 1.0], [1.0, 1.0]], array![[0.0, 2.0], [2.0, 0.0]]], 0.0)
            .unwrap();
        assert_eq!(out, array![[1.0, 1.0, 2.0], [1.0, 2.0, 0.0]]);
    }

    #[test]
    fn mosaic_files_match_metric_suffix_and_sort() {
        let dir = tempfile::tempdir().unwrap();
        for rel in [
            "N71W084/N71W084_winter_vv_COH12.tif",
            "N71W083/N71W083_winter_vv_COH12.tif",
            "N71W083/N71W083_summer_vv_COH12.tif",
            "N71W083/other_winter_vv_COH12.tif",
        ] {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"").unwrap();
        }
        let metric = catalog().into_iter().find(|m| m.name() == "winter_vv_COH12").unwrap();
        let tiles: Vec<Tile> = ["N71W084", "N71W083", "N10E010"].iter().map(|s| s.parse().unwrap()).collect();
        let files = mosaic_files(&tiles, &metric, dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["N71W083/N71W083_winter_vv_COH12.tif", "N71W084/N71W084_winter_vv_COH12.tif"]
        );
    }
}
