use std::io;

use crate::http::connection::Connection;
use crate::http::exchange::{Exchange, Param};
use crate::http::files;
use crate::http::request::{Method, Request};
use crate::http::response::StatusCode;
use crate::plugin::ffi;
use crate::plugin::{Handler, MODULE_SEPARATOR, NAME_CAPACITY};
use crate::server::context::{Context, Filter};

/// Where a request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// A file or directory under the static root (query stripped).
    Static(String),
    /// A handler by bare name, with the source of its parameter blob.
    Handler { name: String, param: Param },
}

/// Decides between static serving and handler invocation.
///
/// GET targets under `prefix` name a handler, with everything after `?` as
/// the parameter. POST targets must be under `prefix`; their parameter is the
/// body.
pub fn route(request: &Request, prefix: &str) -> Result<Route, StatusCode> {
    let target = request.target.as_str();
    let rest = target.strip_prefix(prefix);

    match request.method {
        Method::GET => match rest {
            Some(rest) => {
                let (name, param) = match rest.find('?') {
                    Some(i) => (&rest[..i], Param::Query(prefix.len() + i + 1)),
                    None => (rest, Param::Empty),
                };
                Ok(Route::Handler {
                    name: name.to_string(),
                    param,
                })
            }
            None => Ok(Route::Static(request.path().to_string())),
        },
        Method::POST => {
            let rest = rest.ok_or(StatusCode::NotFound)?;
            let name = rest.split_once('?').map_or(rest, |(name, _)| name);
            Ok(Route::Handler {
                name: name.to_string(),
                param: Param::Body,
            })
        }
    }
}

/// Checks a handler name taken from a request target.
pub fn check_handler_name(name: &str) -> Result<(), StatusCode> {
    if name.len() >= NAME_CAPACITY {
        return Err(StatusCode::PayloadTooLarge);
    }
    // Names with a separator address module entries, never handlers.
    if name.contains(MODULE_SEPARATOR) {
        return Err(StatusCode::Forbidden);
    }
    Ok(())
}

/// Answers one complete request on `conn`.
///
/// Errors are I/O failures while writing; the caller tears the connection
/// down either way.
pub fn dispatch(ctx: &mut Context, conn: &mut Connection) -> io::Result<()> {
    let Context {
        config,
        hooks,
        registry,
    } = ctx;
    let rejection = conn.rejection();
    let mut ex = Exchange::new(conn, config, hooks);

    if let Some(status) = rejection {
        return ex.error_page(status, None);
    }
    let routed = match ex.request() {
        Some(request) => route(request, &config.handler_prefix),
        None => Err(StatusCode::BadRequest),
    };

    if let Some(filter) = hooks.filter {
        if filter(&mut ex)? == Filter::Handled {
            return Ok(());
        }
    }

    match routed {
        Err(status) => ex.error_page(status, None),
        Ok(Route::Static(path)) => files::serve(&mut ex, &config.base_dir, &path),
        Ok(Route::Handler { name, param }) => {
            if let Err(status) = check_handler_name(&name) {
                return ex.error_page(status, None);
            }
            let Some(handler) = registry.handler(&name) else {
                return ex.error_page(StatusCode::NotFound, None);
            };
            ex.set_param(param);
            tracing::debug!(socket = ex.socket(), handler = %name, "Invoking handler");
            match handler {
                Handler::Native(func) => {
                    let rc = ffi::invoke(func, &mut ex);
                    if rc < 0 {
                        return Err(io::Error::other(format!("handler {name} failed with {rc}")));
                    }
                    Ok(())
                }
                Handler::Builtin(func) => func(registry, &mut ex),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::RequestBuilder;

    fn get(target: &str) -> Request {
        RequestBuilder::new()
            .method(Method::GET)
            .target(target)
            .build()
            .unwrap()
    }

    #[test]
    fn query_offset_points_past_question_mark() {
        let request = get("/cgi-bin/echo?a=1");
        let Ok(Route::Handler { param: Param::Query(start), .. }) = route(&request, "/cgi-bin/")
        else {
            panic!("expected handler route");
        };
        assert_eq!(&request.target[start..], "a=1");
    }
}
