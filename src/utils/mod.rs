pub mod phone_validation;
pub use phone_validation::validate_phone_number;
pub mod template;
pub use template::substitute_lead_vars;
pub mod url_validation;
pub use url_validation::{
    UrlValidationError, validate_public_http_url, validate_public_ws_url,
};
