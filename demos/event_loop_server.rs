use ember_http::{Handled, Handler, Request, Response, Server, StatusCode};

struct MyHandler;

impl Handler for MyHandler {
    fn handle(&self, _: &mut (), _: &mut Request, resp: &mut Response) -> Handled {
        resp.status(StatusCode::Ok)
            .header("Content-Type", "text/plain")
            .body("Hello from the event loop!")
    }
}

fn main() {
    env_logger::init();

    Server::builder()
        .listener(Server::bind(8080).unwrap())
        .handler(MyHandler)
        .build_event_loop()
        .launch()
        .unwrap();
}
