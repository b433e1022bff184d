use crate::error::Result;
use crate::geometry::to_geo_geometry;
use crate::gpkg::gpkg_geometry_to_wkb;
use geo::BoundingRect;
use geo_types::Rect;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{Type, ValueRef};
use rusqlite::{Connection, Error};

/// Register the spatial SQL functions the GeoPackage R-tree triggers call.
///
/// Every connection that writes to a feature table needs them, since the
/// triggers fire on each insert and geometry update.
///
/// ```no_run
/// use rusqlite::Connection;
/// use gpkg_append::register_spatial_functions;
///
/// let conn = Connection::open_in_memory()?;
/// register_spatial_functions(&conn)?;
/// # Ok::<(), gpkg_append::AppendError>(())
/// ```
pub fn register_spatial_functions(conn: &Connection) -> Result<()> {
    register_bounds_component(conn, "ST_MinX", |r| r.min().x)?;
    register_bounds_component(conn, "ST_MinY", |r| r.min().y)?;
    register_bounds_component(conn, "ST_MaxX", |r| r.max().x)?;
    register_bounds_component(conn, "ST_MaxY", |r| r.max().y)?;
    register_st_isempty(conn)?;
    Ok(())
}

fn register_st_isempty(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_IsEmpty",
        1,
        FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let Some(bounds) = bounds_from_ctx(ctx)? else {
                return Ok(None);
            };
            Ok(Some(i64::from(bounds.is_none())))
        },
    )?;
    Ok(())
}

fn register_bounds_component<F>(conn: &Connection, name: &str, f: F) -> Result<()>
where
    F: Fn(Rect<f64>) -> f64 + Copy + Send + Sync + 'static,
{
    conn.create_scalar_function(name, 1, FunctionFlags::SQLITE_DETERMINISTIC, move |ctx| {
        Ok(bounds_from_ctx(ctx)?.flatten().map(f))
    })?;
    Ok(())
}

/// `None` for SQL NULL, `Some(None)` for an empty geometry.
fn bounds_from_ctx(ctx: &Context<'_>) -> std::result::Result<Option<Option<Rect<f64>>>, Error> {
    match ctx.get_raw(0) {
        ValueRef::Null => Ok(None),
        ValueRef::Blob(blob) => {
            let wkb =
                gpkg_geometry_to_wkb(blob).map_err(|err| Error::UserFunctionError(Box::new(err)))?;
            let bounds = to_geo_geometry(&wkb).and_then(|geom| geom.bounding_rect());
            Ok(Some(bounds))
        }
        _ => Err(Error::InvalidFunctionParameterType(0, Type::Blob)),
    }
}
