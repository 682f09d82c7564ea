use axum::extract::State;
use axum::routing::{MethodRouter, get};
use axum::{Json, Router};
use serde::Serialize;

use super::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Page {
    Home,
    Explore,
    Contribute,
    Login,
}

impl Page {
    const ALL: [Page; 4] = [Page::Home, Page::Explore, Page::Contribute, Page::Login];

    fn slug(self) -> &'static str {
        match self {
            Page::Home => "/",
            Page::Explore => "/explorar",
            Page::Contribute => "/contribuir",
            Page::Login => "/login",
        }
    }

    fn id(self) -> &'static str {
        match self {
            Page::Home => "home",
            Page::Explore => "explorar",
            Page::Contribute => "contribuir",
            Page::Login => "login",
        }
    }

    fn title(self) -> &'static str {
        match self {
            Page::Home => "Elecciones Subnacionales 2026",
            Page::Explore => "Explorar",
            Page::Contribute => "Contribuir",
            Page::Login => "Iniciar Sesión",
        }
    }

    /// API routes whose data the page renders.
    fn data(self) -> &'static [&'static str] {
        match self {
            Page::Home => &["/v1/explorer"],
            Page::Explore => &[
                "/v1/explorer",
                "/v1/explorer/candidates",
                "/v1/map/features",
                "/v1/map/lookup",
            ],
            Page::Contribute => &["/v1/forms"],
            Page::Login => &["/v1/auth/sessions", "/v1/auth/accounts", "/v1/auth/guest"],
        }
    }

    fn requires_member(self) -> bool {
        self == Page::Contribute
    }
}

#[derive(Debug, Serialize)]
struct NavLink {
    id: &'static str,
    label: &'static str,
    href: String,
    requires_member: bool,
}

#[derive(Debug, Serialize)]
struct PageDescriptor {
    id: &'static str,
    title: &'static str,
    path: String,
    requires_member: bool,
    data: &'static [&'static str],
    links: Vec<NavLink>,
}

/// Site link for `path` under `base_path`.
///
/// The result starts with `/` and ends with `/`. A base path of `/` adds no
/// prefix.
pub fn page_path(base_path: &str, path: &str) -> String {
    let mut normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    if !normalized.ends_with('/') {
        normalized.push('/');
    }

    let base = base_path.trim_end_matches('/');
    if base.is_empty() {
        normalized
    } else if normalized == "/" {
        format!("{}/", base)
    } else {
        format!("{}{}", base, normalized)
    }
}

fn describe(page: Page, base_path: &str) -> PageDescriptor {
    let links = Page::ALL
        .iter()
        .map(|&link| NavLink {
            id: link.id(),
            label: match link {
                Page::Home => "Inicio",
                other => other.title(),
            },
            href: page_path(base_path, link.slug()),
            requires_member: link.requires_member(),
        })
        .collect();

    PageDescriptor {
        id: page.id(),
        title: page.title(),
        path: page_path(base_path, page.slug()),
        requires_member: page.requires_member(),
        data: page.data(),
        links,
    }
}

fn page_route(page: Page) -> MethodRouter<AppState> {
    get(move |State(state): State<AppState>| async move {
        Json(describe(page, &state.config.base_path))
    })
}

/// Adds every page under `base_path`, reachable with and without the
/// trailing slash.
pub(super) fn mount(router: Router<AppState>, base_path: &str) -> Router<AppState> {
    let mut router = router;
    for page in Page::ALL {
        let canonical = page_path(base_path, page.slug());
        let bare = canonical.trim_end_matches('/');
        router = router.route(&canonical, page_route(page));
        if !bare.is_empty() {
            router = router.route(bare, page_route(page));
        }
    }
    router
}
