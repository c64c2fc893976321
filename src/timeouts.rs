use std::net::Shutdown;

use crate::cgi;
use crate::prelude::*;

/// Closes every connection idle past `CLIENT_TIMEOUT`. Runs before each
/// poll so an expired connection survives at most one poll interval.
pub fn process(server: &mut Server, poll: &Poll) {
    let now = Instant::now();
    let cgi_to_client = &mut server.cgi_to_client;
    let purgatory = &mut server.zombie_purgatory;

    server.connections.retain(|token, conn| {
        if now.duration_since(conn.last_activity) <= CLIENT_TIMEOUT {
            return true;
        }
        trace!("connection {:?} timed out", token);

        // A half-parsed request earns a parting 408, best effort only.
        let mid_request =
            conn.request.state != ParsingState::RequestLine || !conn.request.buffer.is_empty();
        if mid_request && conn.write_buffer.is_empty() {
            let vhost = Arc::clone(&conn.vhost);
            handle_error(&mut conn.response, HTTP_REQUEST_TIMEOUT, Some(&vhost));
            conn.response.set_header("connection", "close");
            let bytes = conn.response.to_bytes();
            let _ = conn.stream.write(&bytes);
        }

        let action = std::mem::replace(&mut conn.action, ActiveAction::None);
        if let ActiveAction::Cgi(mut exec) = action {
            if let Some(mut pipe) = exec.in_stream.take() {
                poll.registry().deregister(&mut pipe).ok();
            }
            if let Some(mut pipe) = exec.out_stream.take() {
                poll.registry().deregister(&mut pipe).ok();
            }
            let _ = exec.child.kill();
            cgi::reap_child(exec.child, purgatory);
        }
        if let Some(t) = conn.cgi_in_token.take() {
            cgi_to_client.remove(&t);
        }
        if let Some(t) = conn.cgi_out_token.take() {
            cgi_to_client.remove(&t);
        }

        poll.registry().deregister(&mut conn.stream).ok();
        let _ = conn.stream.shutdown(Shutdown::Both);
        false
    });
}
