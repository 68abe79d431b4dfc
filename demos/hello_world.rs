use ember_http::{Handled, Handler, Request, Response, Server, StatusCode};

struct HelloWorld;

impl Handler<()> for HelloWorld {
    fn handle(&self, _: &mut (), _: &mut Request, resp: &mut Response) -> Handled {
        resp.status(StatusCode::Ok)
            .header("Content-Type", "text/plain")
            .body("Hello, world!")
    }
}

fn main() {
    env_logger::init();

    Server::builder()
        .listener(Server::bind(8080).unwrap())
        .handler(HelloWorld)
        .build()
        .launch_threaded();
}
