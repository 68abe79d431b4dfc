use ember_http::{
    router::{Next, Router},
    Method, Server, StatusCode,
};

fn main() {
    env_logger::init();

    let router: Router = Router::new()
        .middleware(|_, req, _| {
            log::info!("{:?} {:?}", req.method(), req.url().target());
            Next::Continue
        })
        .middleware(|_, req, resp| {
            if req.url().path_segment(0) == Some(b"admin") && req.header(b"x-api-key").is_none() {
                Next::Stop(resp.status(StatusCode::Unauthorized).body("missing api key"))
            } else {
                Next::Continue
            }
        })
        .route(Method::Get, "/", |_, _, resp| {
            resp.status(StatusCode::Ok).body("routed_api demo")
        })
        .route(Method::Get, "/users/:id", |_, req, resp| {
            let id = req.param("id").unwrap_or("");
            resp.status(StatusCode::Ok)
                .header("Content-Type", "application/json")
                .body(format!(r#"{{"id": "{id}"}}"#))
        })
        .route(Method::Get, "/admin/stats", |_, _, resp| {
            resp.status(StatusCode::Ok).body(r#"{"connections": 0}"#)
        });

    Server::builder()
        .listener(Server::bind(8080).unwrap())
        .handler(router)
        .build()
        .launch_threaded();
}
