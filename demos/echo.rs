use ember_http::{Handled, Handler, Request, Response, Server, StatusCode};
use std::str::from_utf8;

struct MyHandler;

impl Handler for MyHandler {
    fn handle(&self, _: &mut (), req: &mut Request, resp: &mut Response) -> Handled {
        let result = format!(
            r#"{{"url": {:?}, "body": {:?}}}"#,
            from_utf8(req.url().path()).unwrap_or(""),
            from_utf8(req.body()).unwrap_or(""),
        );

        resp.status(StatusCode::Ok)
            .header("Content-Type", "application/json")
            .body(result)
    }
}

fn main() {
    env_logger::init();

    Server::builder()
        .listener(Server::bind(8080).unwrap())
        .handler(MyHandler)
        .build()
        .launch_threaded();
}
