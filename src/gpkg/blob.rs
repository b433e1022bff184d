use crate::error::{AppendError, Result};
use crate::geometry::{storable, to_geo_geometry};
use geo::BoundingRect;
use geo_types::Geometry;
use wkb::reader::Wkb;

const HEADER_LEN: usize = 8;
const FLAG_LITTLE_ENDIAN: u8 = 0b0000_0001;
const FLAG_EMPTY: u8 = 0b0001_0000;

/// Strip GeoPackage header and envelope bytes to access raw WKB.
// cf. https://www.geopackage.org/spec140/index.html#gpb_format
pub(crate) fn gpkg_geometry_to_wkb(b: &[u8]) -> Result<Wkb<'_>> {
    if b.len() < HEADER_LEN {
        return Err(AppendError::InvalidGpkgGeometryLength {
            len: b.len(),
            minimum: HEADER_LEN,
        });
    }

    let flags = b[3];
    let envelope_size: usize = match flags & 0b00001110 {
        0b00000000 => 0,  // no envelope
        0b00000010 => 32, // [minx, maxx, miny, maxy]
        0b00000100 => 48, // [minx, maxx, miny, maxy, minz, maxz]
        0b00000110 => 48, // [minx, maxx, miny, maxy, minm, maxm]
        0b00001000 => 64, // [minx, maxx, miny, maxy, minz, maxz, minm, maxm]
        _ => {
            return Err(AppendError::InvalidGpkgGeometryFlags(flags));
        }
    };
    let offset = HEADER_LEN + envelope_size;
    if b.len() < offset {
        return Err(AppendError::InvalidGpkgGeometryEnvelope {
            len: b.len(),
            required: offset,
        });
    }

    Ok(Wkb::try_new(&b[offset..])?)
}

/// Decode a GeoPackage geometry blob. An empty point has no `geo_types`
/// form and decodes to `None`.
pub(crate) fn decode_gpkg_geometry(b: &[u8]) -> Result<Option<Geometry<f64>>> {
    let wkb = gpkg_geometry_to_wkb(b)?;
    Ok(to_geo_geometry(&wkb))
}

/// Encode a geometry as a GeoPackage blob: header without envelope, then
/// little-endian XY WKB.
pub(crate) fn encode_gpkg_geometry(geometry: &Geometry<f64>, srs_id: u32) -> Result<Vec<u8>> {
    let geometry = storable(geometry);

    let mut flags = FLAG_LITTLE_ENDIAN;
    if geometry.bounding_rect().is_none() {
        flags |= FLAG_EMPTY;
    }

    let mut blob = Vec::with_capacity(64);
    blob.extend_from_slice(&[
        0x47u8, // magic
        0x50u8, // magic
        0x00u8, // version
        flags,
    ]);
    blob.extend_from_slice(&srs_id.to_le_bytes());
    wkb::writer::write_geometry(&mut blob, geometry.as_ref(), &Default::default())?;

    Ok(blob)
}
