//! Maps request paths onto the built-in API routes.
//!
//! Anything that is not a built-in route goes to the callback chain and, failing
//! that, to static file serving.

use tracing::trace;

type InnerRouter<T> = matchit::Router<T>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum RouteKind {
    FsList,
    FsFile,
    Restart,
    Log,
    Exec,
    Flash,
    Ping,
    Version,
    Root,
}

const ROUTES: &[(&str, RouteKind)] = &[
    ("/api/fs", RouteKind::FsList),
    ("/api/fs/", RouteKind::FsList),
    ("/api/fs/{*path}", RouteKind::FsFile),
    ("/api/restart", RouteKind::Restart),
    ("/api/log", RouteKind::Log),
    ("/api/exec", RouteKind::Exec),
    ("/api/flash/{range}", RouteKind::Flash),
    ("/api/ping", RouteKind::Ping),
    ("/api/version", RouteKind::Version),
    ("/", RouteKind::Root),
];

/// A routed request, borrowing its parameters from the request path.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Route<'req> {
    /// Directory listing of the filesystem root.
    FsList,
    /// A single file, addressed relative to the filesystem root.
    FsFile(&'req str),
    Restart,
    Log,
    Exec,
    /// `<hex-offset>` for writes, `<hex-offset>,<hex-length>` for reads.
    Flash(&'req str),
    Ping,
    Version,
    Root,
    /// Callback chain, then static files.
    Fallback,
}

impl Route<'_> {
    /// Whether the route is refused without the configured credentials.
    pub fn requires_auth(&self) -> bool {
        !matches!(self, Self::Ping | Self::Version | Self::Fallback)
    }
}

#[derive(Debug)]
pub struct ApiRouter {
    inner_router: InnerRouter<RouteKind>,
}

impl ApiRouter {
    pub fn new() -> Result<Self, matchit::InsertError> {
        let mut inner_router = InnerRouter::new();
        for &(path, kind) in ROUTES {
            inner_router.insert(path, kind)?;
        }
        Ok(Self { inner_router })
    }

    pub fn at<'req>(&self, path: &'req str) -> Route<'req> {
        let Ok(matched) = self.inner_router.at(path) else {
            trace!(path, "no built-in route");
            return Route::Fallback;
        };

        match matched.value {
            RouteKind::FsList => Route::FsList,
            RouteKind::FsFile => matched.params.get("path").map_or(Route::FsList, Route::FsFile),
            RouteKind::Restart => Route::Restart,
            RouteKind::Log => Route::Log,
            RouteKind::Exec => Route::Exec,
            RouteKind::Flash => matched.params.get("range").map_or(Route::Fallback, Route::Flash),
            RouteKind::Ping => Route::Ping,
            RouteKind::Version => Route::Version,
            RouteKind::Root => Route::Root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_routes() {
        let router = ApiRouter::new().unwrap();

        assert_eq!(router.at("/api/fs"), Route::FsList);
        assert_eq!(router.at("/api/fs/"), Route::FsList);
        assert_eq!(router.at("/api/fs/init.lua"), Route::FsFile("init.lua"));
        assert_eq!(router.at("/api/fs/www/app.js"), Route::FsFile("www/app.js"));
        assert_eq!(router.at("/api/restart"), Route::Restart);
        assert_eq!(router.at("/api/log"), Route::Log);
        assert_eq!(router.at("/api/exec"), Route::Exec);
        assert_eq!(router.at("/api/flash/1000"), Route::Flash("1000"));
        assert_eq!(router.at("/api/flash/1000,200"), Route::Flash("1000,200"));
        assert_eq!(router.at("/api/ping"), Route::Ping);
        assert_eq!(router.at("/api/version"), Route::Version);
        assert_eq!(router.at("/"), Route::Root);
    }

    #[test]
    fn everything_else_falls_back() {
        let router = ApiRouter::new().unwrap();

        assert_eq!(router.at("/api/led"), Route::Fallback);
        assert_eq!(router.at("/index.html"), Route::Fallback);
        assert_eq!(router.at("/api/flash"), Route::Fallback);
        assert_eq!(router.at("/api/pingpong"), Route::Fallback);
    }

    #[test]
    fn only_ping_version_and_fallback_are_open() {
        assert!(Route::FsList.requires_auth());
        assert!(Route::FsFile("a").requires_auth());
        assert!(Route::Flash("0").requires_auth());
        assert!(Route::Root.requires_auth());
        assert!(!Route::Ping.requires_auth());
        assert!(!Route::Version.requires_auth());
        assert!(!Route::Fallback.requires_auth());
    }
}
