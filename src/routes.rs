use actix_web::web;

use crate::handlers::{self, AppState};

// Like the prediction service, every alias maps onto the same handler;
// `{project}` and `{publishedName}` are accepted and ignored.
pub const IMAGE_ROUTES: [&str; 7] = [
    "/image",
    "/{project}/image",
    "/{project}/image/nostore",
    "/{project}/classify/iterations/{publishedName}/image",
    "/{project}/classify/iterations/{publishedName}/image/nostore",
    "/{project}/detect/iterations/{publishedName}/image",
    "/{project}/detect/iterations/{publishedName}/image/nostore",
];

pub const URL_ROUTES: [&str; 7] = [
    "/url",
    "/{project}/url",
    "/{project}/url/nostore",
    "/{project}/classify/iterations/{publishedName}/url",
    "/{project}/classify/iterations/{publishedName}/url/nostore",
    "/{project}/detect/iterations/{publishedName}/url",
    "/{project}/detect/iterations/{publishedName}/url/nostore",
];

/// Registers the shared state, the body limit and every route.
pub fn init(state: web::Data<AppState>) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(web::PayloadConfig::new(state.max_body_bytes))
            .app_data(state)
            .route("/", web::get().to(handlers::index))
            .service(
                web::resource(IMAGE_ROUTES.to_vec())
                    .route(web::post().to(handlers::predict_image)),
            )
            .service(
                web::resource(URL_ROUTES.to_vec()).route(web::post().to(handlers::predict_url)),
            );
    }
}
