use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Login,
    Cookies,
}

/// An audiobook service audiobook-dl can fetch from.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub auth_methods: &'static [AuthMethod],
    pub login_fields: &'static [&'static str],
    pub requires_shelf: bool,
    pub example_url: &'static str,
}

pub const SUPPORTED_SERVICES: &[ServiceInfo] = &[
    ServiceInfo {
        id: "storytel",
        name: "Storytel / Mofibo",
        auth_methods: &[AuthMethod::Login],
        login_fields: &["username", "password"],
        requires_shelf: true,
        example_url: "https://www.storytel.com/pl/books/example-book-12345",
    },
    ServiceInfo {
        id: "saxo",
        name: "Saxo",
        auth_methods: &[AuthMethod::Login],
        login_fields: &["username", "password"],
        requires_shelf: false,
        example_url: "https://www.saxo.com/en/book-name",
    },
    ServiceInfo {
        id: "nextory",
        name: "Nextory",
        auth_methods: &[AuthMethod::Login],
        login_fields: &["username", "password"],
        requires_shelf: false,
        example_url: "https://nextory.com/book/example",
    },
    ServiceInfo {
        id: "ereolen",
        name: "eReolen",
        auth_methods: &[AuthMethod::Cookies, AuthMethod::Login],
        login_fields: &["username", "password", "library"],
        requires_shelf: false,
        example_url: "https://ereolen.dk/ting/object/example",
    },
    ServiceInfo {
        id: "podimo",
        name: "Podimo",
        auth_methods: &[AuthMethod::Login],
        login_fields: &["username", "password"],
        requires_shelf: false,
        example_url: "https://podimo.com/book/example",
    },
    ServiceInfo {
        id: "yourcloudlibrary",
        name: "YourCloudLibrary",
        auth_methods: &[AuthMethod::Cookies, AuthMethod::Login],
        login_fields: &["username", "password", "library"],
        requires_shelf: false,
        example_url: "https://www.yourcloudlibrary.com/title/example",
    },
    ServiceInfo {
        id: "everand",
        name: "Everand (Scribd)",
        auth_methods: &[AuthMethod::Cookies],
        login_fields: &[],
        requires_shelf: false,
        example_url: "https://everand.com/book/example",
    },
];

pub fn find_service(id: &str) -> Option<&'static ServiceInfo> {
    let id = id.to_lowercase();
    SUPPORTED_SERVICES.iter().find(|service| service.id == id)
}
