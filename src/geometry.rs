//! Geometry helpers used when pasting source geometries into a target layer.
//!
//! Geometries are handled as `geo_types::Geometry<f64>` in XY. The GeoPackage
//! layer decodes stored blobs into this form and encodes them back on write.

use crate::error::Result;
use crate::store::{FeatureRequest, FeatureSource};
use geo::BooleanOps;
use geo_traits::{
    CoordTrait, GeometryCollectionTrait, GeometryTrait, LineStringTrait, MultiLineStringTrait,
    MultiPointTrait, MultiPolygonTrait, PointTrait, PolygonTrait,
};
use geo_types::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};
use std::borrow::Cow;

/// Topological type of a geometry or of a layer, independent of multiplicity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    Point,
    Line,
    Polygon,
    /// Generic: the layer accepts any geometry.
    Unknown,
    /// No geometry at all (a non-spatial table).
    Null,
}

/// Topological kind of a single geometry. Mixed collections are `Unknown`.
pub fn geometry_kind(geometry: &Geometry<f64>) -> GeometryKind {
    match geometry {
        Geometry::Point(_) | Geometry::MultiPoint(_) => GeometryKind::Point,
        Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
            GeometryKind::Line
        }
        Geometry::Polygon(_)
        | Geometry::MultiPolygon(_)
        | Geometry::Rect(_)
        | Geometry::Triangle(_) => GeometryKind::Polygon,
        Geometry::GeometryCollection(collection) => {
            let mut kinds = collection.0.iter().map(geometry_kind);
            match kinds.next() {
                Some(first) if kinds.all(|kind| kind == first) => first,
                _ => GeometryKind::Unknown,
            }
        }
    }
}

pub fn is_multi(geometry: &Geometry<f64>) -> bool {
    matches!(
        geometry,
        Geometry::MultiPoint(_)
            | Geometry::MultiLineString(_)
            | Geometry::MultiPolygon(_)
            | Geometry::GeometryCollection(_)
    )
}

/// Single-kind parts of a geometry.
enum Parts {
    Points(Vec<Point<f64>>),
    Lines(Vec<LineString<f64>>),
    Polygons(Vec<Polygon<f64>>),
}

impl Parts {
    fn of(geometry: &Geometry<f64>) -> Option<Self> {
        let parts = match geometry {
            Geometry::Point(p) => Parts::Points(vec![*p]),
            Geometry::MultiPoint(mp) => Parts::Points(mp.0.clone()),
            Geometry::Line(l) => Parts::Lines(vec![LineString::from(*l)]),
            Geometry::LineString(l) => Parts::Lines(vec![l.clone()]),
            Geometry::MultiLineString(ml) => Parts::Lines(ml.0.clone()),
            Geometry::Polygon(p) => Parts::Polygons(vec![p.clone()]),
            Geometry::MultiPolygon(mp) => Parts::Polygons(mp.0.clone()),
            Geometry::Rect(r) => Parts::Polygons(vec![r.to_polygon()]),
            Geometry::Triangle(t) => Parts::Polygons(vec![t.to_polygon()]),
            Geometry::GeometryCollection(collection) => {
                let mut merged: Option<Parts> = None;
                for member in &collection.0 {
                    let member = Parts::of(member)?;
                    merged = Some(match (merged, member) {
                        (None, member) => member,
                        (Some(Parts::Points(mut a)), Parts::Points(b)) => {
                            a.extend(b);
                            Parts::Points(a)
                        }
                        (Some(Parts::Lines(mut a)), Parts::Lines(b)) => {
                            a.extend(b);
                            Parts::Lines(a)
                        }
                        (Some(Parts::Polygons(mut a)), Parts::Polygons(b)) => {
                            a.extend(b);
                            Parts::Polygons(a)
                        }
                        _ => return None,
                    });
                }
                merged?
            }
        };
        Some(parts)
    }

    fn into_geometry(self, multi: bool) -> Option<Geometry<f64>> {
        if multi {
            return Some(match self {
                Parts::Points(points) => Geometry::MultiPoint(MultiPoint::new(points)),
                Parts::Lines(lines) => Geometry::MultiLineString(MultiLineString::new(lines)),
                Parts::Polygons(polygons) => Geometry::MultiPolygon(MultiPolygon::new(polygons)),
            });
        }

        // Multi-part to single-part only works when there is exactly one part.
        match self {
            Parts::Points(mut points) if points.len() == 1 => points.pop().map(Geometry::Point),
            Parts::Lines(mut lines) if lines.len() == 1 => lines.pop().map(Geometry::LineString),
            Parts::Polygons(mut polygons) if polygons.len() == 1 => {
                polygons.pop().map(Geometry::Polygon)
            }
            _ => None,
        }
    }
}

/// Convert `geometry` to the given kind and multiplicity.
///
/// Returns `None` when the shape cannot be represented in the requested type,
/// for instance a polygon with holes forced into a single line, or a
/// two-part geometry forced into a single-part type.
pub fn convert_to_type(
    geometry: &Geometry<f64>,
    kind: GeometryKind,
    multi: bool,
) -> Option<Geometry<f64>> {
    match kind {
        GeometryKind::Unknown => return Some(geometry.clone()),
        GeometryKind::Null => return None,
        _ => {}
    }

    let parts = Parts::of(geometry)?;
    let converted = match (parts, kind) {
        (parts @ Parts::Points(_), GeometryKind::Point)
        | (parts @ Parts::Lines(_), GeometryKind::Line)
        | (parts @ Parts::Polygons(_), GeometryKind::Polygon) => parts,

        // Points can only be collected into a multi-point.
        (Parts::Lines(lines), GeometryKind::Point) if multi => {
            Parts::Points(lines.iter().flat_map(|l| l.points()).collect())
        }
        (Parts::Polygons(polygons), GeometryKind::Point) if multi => Parts::Points(
            polygons
                .iter()
                .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()))
                .flat_map(ring_vertices)
                .map(Point::from)
                .collect(),
        ),

        (Parts::Points(points), GeometryKind::Line) => {
            if points.len() < 2 {
                return None;
            }
            Parts::Lines(vec![points.into_iter().collect()])
        }
        (Parts::Polygons(polygons), GeometryKind::Line) => {
            // A polygon with holes can only be represented as several lines.
            if !multi && (polygons.len() != 1 || !polygons[0].interiors().is_empty()) {
                return None;
            }
            Parts::Lines(
                polygons
                    .into_iter()
                    .flat_map(|p| {
                        let (exterior, interiors) = p.into_inner();
                        std::iter::once(exterior).chain(interiors)
                    })
                    .collect(),
            )
        }

        (Parts::Points(points), GeometryKind::Polygon) => {
            let ring: LineString<f64> = points.into_iter().collect();
            Parts::Polygons(vec![polygon_from_ring(ring)?])
        }
        (Parts::Lines(lines), GeometryKind::Polygon) => Parts::Polygons(
            lines
                .into_iter()
                .map(polygon_from_ring)
                .collect::<Option<Vec<_>>>()?,
        ),

        _ => return None,
    };

    converted.into_geometry(multi)
}

/// Vertices of a ring without the repeated closing coordinate.
fn ring_vertices(ring: &LineString<f64>) -> Vec<Coord<f64>> {
    let mut coords = ring.0.clone();
    if ring.is_closed() && coords.len() > 1 {
        coords.pop();
    }
    coords
}

fn polygon_from_ring(ring: LineString<f64>) -> Option<Polygon<f64>> {
    if ring_vertices(&ring).len() < 3 {
        return None;
    }
    // Polygon::new closes the ring when needed.
    Some(Polygon::new(ring, vec![]))
}

/// A set of polygons that pasted geometries must not overlap.
#[derive(Clone, Debug)]
pub struct AvoidIntersectionLayer {
    pub name: String,
    pub polygons: MultiPolygon<f64>,
}

impl AvoidIntersectionLayer {
    pub fn new(name: impl Into<String>, polygons: MultiPolygon<f64>) -> Self {
        Self {
            name: name.into(),
            polygons,
        }
    }

    /// Collect the polygons of every feature of `layer`. Other geometries
    /// are ignored.
    pub fn from_layer<S: FeatureSource + ?Sized>(layer: &S) -> Result<Self> {
        let mut polygons = Vec::new();
        for feature in layer.features(&FeatureRequest::all())? {
            if let Some(Parts::Polygons(parts)) = feature?.geometry.as_ref().and_then(Parts::of) {
                polygons.extend(parts);
            }
        }

        tracing::debug!(
            layer = layer.name(),
            polygons = polygons.len(),
            "loaded intersection avoidance layer"
        );
        Ok(Self::new(layer.name(), MultiPolygon::new(polygons)))
    }
}

/// Cut the area covered by `layers` out of a polygon geometry.
///
/// Non-polygon geometries are returned untouched. So is the input when the
/// cut would leave nothing, or would split a single polygon into parts.
pub fn avoid_intersections(
    geometry: Geometry<f64>,
    layers: &[AvoidIntersectionLayer],
) -> Geometry<f64> {
    let (mut remaining, multi) = match &geometry {
        Geometry::Polygon(p) => (MultiPolygon::new(vec![p.clone()]), false),
        Geometry::MultiPolygon(mp) => (mp.clone(), true),
        _ => return geometry,
    };

    for layer in layers.iter().filter(|layer| !layer.polygons.0.is_empty()) {
        remaining = remaining.difference(&layer.polygons);
    }

    if remaining.0.is_empty() {
        tracing::debug!("intersection avoidance would remove the whole geometry; kept as is");
        return geometry;
    }
    if multi {
        return Geometry::MultiPolygon(remaining);
    }
    match remaining.0.len() {
        1 => remaining.0.pop().map_or(geometry, Geometry::Polygon),
        _ => {
            tracing::debug!("intersection avoidance split a single polygon; kept as is");
            geometry
        }
    }
}

/// Replace the `geo_types` shorthand variants (`Line`, `Rect`, `Triangle`)
/// with the line string or polygon GeoPackage stores for them.
pub(crate) fn storable(geometry: &Geometry<f64>) -> Cow<'_, Geometry<f64>> {
    match geometry {
        Geometry::Line(l) => Cow::Owned(Geometry::LineString(LineString::from(*l))),
        Geometry::Rect(r) => Cow::Owned(Geometry::Polygon(r.to_polygon())),
        Geometry::Triangle(t) => Cow::Owned(Geometry::Polygon(t.to_polygon())),
        Geometry::GeometryCollection(collection)
            if collection
                .0
                .iter()
                .any(|g| matches!(storable(g), Cow::Owned(_))) =>
        {
            Cow::Owned(Geometry::GeometryCollection(GeometryCollection(
                collection
                    .0
                    .iter()
                    .map(|g| storable(g).into_owned())
                    .collect(),
            )))
        }
        _ => Cow::Borrowed(geometry),
    }
}

/// Materialize any geometry (for instance a borrowed WKB reader) as a
/// `geo_types` geometry. Empty points have no `geo_types` form and yield `None`.
pub(crate) fn to_geo_geometry<G: GeometryTrait<T = f64>>(geom: &G) -> Option<Geometry<f64>> {
    use geo_traits::GeometryType as GeoType;

    let geometry = match geom.as_type() {
        GeoType::Point(point) => Geometry::Point(to_point(point)?),
        GeoType::LineString(line) => Geometry::LineString(to_line_string(line)),
        GeoType::Polygon(poly) => Geometry::Polygon(to_polygon(poly)),
        GeoType::MultiPoint(multi) => Geometry::MultiPoint(MultiPoint::new(
            multi.points().filter_map(|p| to_point(&p)).collect(),
        )),
        GeoType::MultiLineString(multi) => Geometry::MultiLineString(MultiLineString::new(
            multi.line_strings().map(|l| to_line_string(&l)).collect(),
        )),
        GeoType::MultiPolygon(multi) => Geometry::MultiPolygon(MultiPolygon::new(
            multi.polygons().map(|p| to_polygon(&p)).collect(),
        )),
        GeoType::GeometryCollection(collection) => {
            Geometry::GeometryCollection(GeometryCollection::from(
                collection
                    .geometries()
                    .filter_map(|g| to_geo_geometry(&g))
                    .collect::<Vec<_>>(),
            ))
        }
        // Not produced by WKB decoding.
        GeoType::Rect(_) | GeoType::Triangle(_) | GeoType::Line(_) => return None,
    };
    Some(geometry)
}

fn to_coord<C: CoordTrait<T = f64>>(coord: &C) -> Coord<f64> {
    let (x, y) = coord.x_y();
    Coord { x, y }
}

fn to_point<P: PointTrait<T = f64>>(point: &P) -> Option<Point<f64>> {
    point.coord().map(|c| Point::from(to_coord(&c)))
}

fn to_line_string<L: LineStringTrait<T = f64>>(line: &L) -> LineString<f64> {
    LineString::new(line.coords().map(|c| to_coord(&c)).collect())
}

fn to_polygon<P: PolygonTrait<T = f64>>(poly: &P) -> Polygon<f64> {
    let exterior = poly
        .exterior()
        .map(|ring| to_line_string(&ring))
        .unwrap_or_else(|| LineString::new(vec![]));
    let interiors = poly.interiors().map(|ring| to_line_string(&ring)).collect();
    Polygon::new(exterior, interiors)
}

#[cfg(test)]
mod tests {
    use super::{
        AvoidIntersectionLayer, GeometryKind, avoid_intersections, convert_to_type,
        geometry_kind, to_geo_geometry,
    };
    use geo_types::{Geometry, LineString, MultiPoint, MultiPolygon, Point, Polygon, polygon};
    use std::str::FromStr;
    use wkt::Wkt;

    fn square(x0: f64, y0: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
            (x: x0, y: y0),
        ]
    }

    fn from_wkt(wkt: &str) -> Geometry<f64> {
        let wkt = Wkt::<f64>::from_str(wkt).expect("valid wkt");
        to_geo_geometry(&wkt).expect("non-empty geometry")
    }

    #[test]
    fn single_polygon_becomes_multi_polygon() {
        let converted = convert_to_type(
            &Geometry::Polygon(square(0.0, 0.0, 1.0)),
            GeometryKind::Polygon,
            true,
        );
        assert_eq!(
            converted,
            Some(Geometry::MultiPolygon(MultiPolygon::new(vec![square(
                0.0, 0.0, 1.0
            )])))
        );
    }

    #[test]
    fn multi_part_to_single_part_needs_one_part() {
        let one = Geometry::MultiPolygon(MultiPolygon::new(vec![square(0.0, 0.0, 1.0)]));
        assert_eq!(
            convert_to_type(&one, GeometryKind::Polygon, false),
            Some(Geometry::Polygon(square(0.0, 0.0, 1.0)))
        );

        let two = Geometry::MultiPolygon(MultiPolygon::new(vec![
            square(0.0, 0.0, 1.0),
            square(5.0, 5.0, 1.0),
        ]));
        assert_eq!(convert_to_type(&two, GeometryKind::Polygon, false), None);
    }

    #[test]
    fn polygon_with_hole_cannot_become_a_single_line() {
        let simple = from_wkt("POLYGON ((0 0, 10 0, 10 10, 0 10, 0 0))");
        let holed =
            from_wkt("POLYGON ((0 0, 10 0, 10 10, 0 10, 0 0), (2 2, 4 2, 4 4, 2 4, 2 2))");

        let line = convert_to_type(&simple, GeometryKind::Line, false);
        assert!(matches!(line, Some(Geometry::LineString(ref l)) if l.0.len() == 5));
        assert_eq!(convert_to_type(&holed, GeometryKind::Line, false), None);

        // Several lines are fine.
        let lines = convert_to_type(&holed, GeometryKind::Line, true);
        assert!(matches!(lines, Some(Geometry::MultiLineString(ref ml)) if ml.0.len() == 2));
    }

    #[test]
    fn points_and_lines_promote_when_vertex_counts_allow() {
        let mp = Geometry::MultiPoint(MultiPoint::from(vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
        ]));
        assert!(matches!(
            convert_to_type(&mp, GeometryKind::Line, false),
            Some(Geometry::LineString(_))
        ));
        assert!(matches!(
            convert_to_type(&mp, GeometryKind::Polygon, false),
            Some(Geometry::Polygon(_))
        ));

        let short = Geometry::LineString(LineString::from(vec![(0.0, 0.0), (1.0, 1.0)]));
        assert_eq!(convert_to_type(&short, GeometryKind::Polygon, false), None);
        assert_eq!(
            convert_to_type(&Geometry::Point(Point::new(0.0, 0.0)), GeometryKind::Line, false),
            None
        );
        // Vertices only fit a multi-point.
        assert_eq!(convert_to_type(&short, GeometryKind::Point, false), None);
        assert!(matches!(
            convert_to_type(&short, GeometryKind::Point, true),
            Some(Geometry::MultiPoint(ref p)) if p.0.len() == 2
        ));
    }

    #[test]
    fn generic_target_keeps_geometry() {
        let line = from_wkt("LINESTRING (0 0, 1 1)");
        assert_eq!(
            convert_to_type(&line, GeometryKind::Unknown, false),
            Some(line.clone())
        );
        assert_eq!(geometry_kind(&line), GeometryKind::Line);
    }

    #[test]
    fn avoid_intersections_cuts_overlap() {
        let layer = AvoidIntersectionLayer::new(
            "existing",
            MultiPolygon::new(vec![square(5.0, 0.0, 10.0)]),
        );
        let result = avoid_intersections(Geometry::Polygon(square(0.0, 0.0, 10.0)), &[layer]);
        let Geometry::Polygon(poly) = result else {
            panic!("expected a polygon: {result:?}");
        };
        let max_x = poly
            .exterior()
            .0
            .iter()
            .map(|c| c.x)
            .fold(f64::MIN, f64::max);
        assert!((max_x - 5.0).abs() < 1e-9);
    }

    #[test]
    fn empty_avoidance_layers_leave_geometry_alone() {
        let nothing = AvoidIntersectionLayer::new("nothing", MultiPolygon::new(vec![]));
        let parcel = Geometry::Polygon(square(0.0, 0.0, 10.0));
        assert_eq!(avoid_intersections(parcel.clone(), &[nothing]), parcel);
    }

    #[test]
    fn avoid_intersections_keeps_geometry_that_would_vanish() {
        let covered = Geometry::Polygon(square(1.0, 1.0, 1.0));
        let layer =
            AvoidIntersectionLayer::new("cover", MultiPolygon::new(vec![square(0.0, 0.0, 10.0)]));
        assert_eq!(avoid_intersections(covered.clone(), &[layer]), covered);

        let line = from_wkt("LINESTRING (0 0, 1 1)");
        let layer =
            AvoidIntersectionLayer::new("cover", MultiPolygon::new(vec![square(0.0, 0.0, 10.0)]));
        assert_eq!(avoid_intersections(line.clone(), &[layer]), line);
    }
}
