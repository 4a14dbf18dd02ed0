//! In-process stand-in for a home router: an SSDP responder on UDP and a
//! small HTTP server serving the device description, the WANIPConnection
//! control URL and a plain-text public IP endpoint.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;

pub const IGD_DEVICE: &str = "urn:schemas-upnp-org:device:InternetGatewayDevice:1";

/// How the mock router behaves
#[derive(Debug, Clone)]
pub struct MockOptions {
    pub device_type: String,
    /// `None` makes GetExternalIPAddress answer with a SOAP fault
    pub external_ip: Option<String>,
    /// Body of `GET /ip`
    pub public_ip_body: String,
    /// Never answer `GET /ip`
    pub stall_public_ip: bool,
    /// Locations advertised before this gateway's own in every search reply
    pub earlier_locations: Vec<String>,
    /// UPnP error code AddPortMapping answers with
    pub mapping_fault: Option<u16>,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            device_type: IGD_DEVICE.to_string(),
            external_ip: Some("203.0.113.5".to_string()),
            public_ip_body: "198.51.100.7\n".to_string(),
            stall_public_ip: false,
            earlier_locations: Vec::new(),
            mapping_fault: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub struct MockGateway {
    pub http_addr: SocketAddr,
    pub ssdp_addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    searches: Arc<AtomicUsize>,
    tasks: Vec<JoinHandle<()>>,
}

impl MockGateway {
    pub async fn start(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_addr = listener.local_addr().unwrap();
        let ssdp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let ssdp_addr = ssdp.local_addr().unwrap();

        let requests = Arc::new(Mutex::new(Vec::new()));
        let searches = Arc::new(AtomicUsize::new(0));

        let ssdp_task = {
            let searches = searches.clone();
            let earlier_locations = options.earlier_locations.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1500];
                loop {
                    let (size, from) = match ssdp.recv_from(&mut buf).await {
                        Ok(received) => received,
                        Err(_) => return,
                    };
                    if !String::from_utf8_lossy(&buf[..size]).starts_with("M-SEARCH") {
                        continue;
                    }
                    searches.fetch_add(1, Ordering::SeqCst);
                    for location in &earlier_locations {
                        let _ = ssdp.send_to(search_reply(location).as_bytes(), from).await;
                    }
                    let reply = search_reply(&format!("http://{}/desc.xml", http_addr));
                    let _ = ssdp.send_to(reply.as_bytes(), from).await;
                }
            })
        };

        let http_task = {
            let requests = requests.clone();
            let options = Arc::new(options);
            tokio::spawn(async move {
                loop {
                    let (stream, _) = match listener.accept().await {
                        Ok(accepted) => accepted,
                        Err(_) => return,
                    };

                    let io = TokioIo::new(stream);
                    let requests = requests.clone();
                    let options = options.clone();

                    tokio::spawn(async move {
                        let service = service_fn(move |req| handle(req, options.clone(), requests.clone()));
                        let _ = http1::Builder::new().serve_connection(io, service).await;
                    });
                }
            })
        };

        Self {
            http_addr,
            ssdp_addr,
            requests,
            searches,
            tasks: vec![ssdp_task, http_task],
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn soap_requests(&self) -> Vec<RecordedRequest> {
        self.requests().into_iter().filter(|r| r.method == "POST").collect()
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.http_addr, path)
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn handle(
    req: Request<Incoming>,
    options: Arc<MockOptions>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) -> Result<Response<String>, Infallible> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let headers = req
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).to_string()))
        .collect();
    let body = match req.into_body().collect().await {
        Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).to_string(),
        Err(_) => String::new(),
    };

    let request = RecordedRequest { method, path, headers, body };
    requests.lock().push(request.clone());

    let (status, content_type, body) = match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/desc.xml") => (StatusCode::OK, "text/xml", description(&options.device_type)),
        ("GET", "/ip") => {
            if options.stall_public_ip {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            (StatusCode::OK, "text/plain", options.public_ip_body.clone())
        }
        ("POST", "/ctl/IPConn") => soap_reply(&request, &options),
        _ => (StatusCode::NOT_FOUND, "text/plain", String::new()),
    };

    Ok(Response::builder()
        .status(status)
        .header("Content-Type", content_type)
        .body(body)
        .unwrap())
}

fn soap_reply(request: &RecordedRequest, options: &MockOptions) -> (StatusCode, &'static str, String) {
    let action = request
        .header("SOAPACTION")
        .and_then(|a| a.trim_matches('"').split('#').nth(1))
        .unwrap_or("")
        .to_string();

    if let (Some(code), "AddPortMapping") = (options.mapping_fault, action.as_str()) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "text/xml", fault(code, "ConflictInMappingEntry"));
    }

    let inner = match (action.as_str(), &options.external_ip) {
        ("GetExternalIPAddress", Some(ip)) => format!(
            "<u:GetExternalIPAddressResponse xmlns:u=\"urn:schemas-upnp-org:service:WANIPConnection:1\">\
             <NewExternalIPAddress>{}</NewExternalIPAddress>\
             </u:GetExternalIPAddressResponse>",
            ip
        ),
        ("GetExternalIPAddress", None) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, "text/xml", fault(501, "ActionFailed"))
        }
        ("AddPortMapping", _) | ("DeletePortMapping", _) => format!(
            "<u:{0}Response xmlns:u=\"urn:schemas-upnp-org:service:WANIPConnection:1\"></u:{0}Response>",
            action
        ),
        _ => return (StatusCode::INTERNAL_SERVER_ERROR, "text/xml", fault(401, "Invalid Action")),
    };

    (StatusCode::OK, "text/xml", envelope(&inner))
}

fn search_reply(location: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         CACHE-CONTROL: max-age=120\r\n\
         ST: upnp:rootdevice\r\n\
         USN: uuid:mock-igd::upnp:rootdevice\r\n\
         EXT:\r\n\
         SERVER: Mock/1.0 UPnP/1.0\r\n\
         Location: {}\r\n\r\n",
        location
    )
}

fn envelope(inner: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?>\
         <s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\" \
         s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\">\
         <s:Body>{}</s:Body></s:Envelope>",
        inner
    )
}

fn fault(code: u16, description: &str) -> String {
    envelope(&format!(
        "<s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring>\
         <detail><UPnPError xmlns=\"urn:schemas-upnp-org:control-1-0\">\
         <errorCode>{}</errorCode><errorDescription>{}</errorDescription>\
         </UPnPError></detail></s:Fault>",
        code, description
    ))
}

fn description(device_type: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>{}</deviceType>
    <friendlyName>Mock Router</friendlyName>
    <deviceList>
      <device>
        <deviceType>urn:schemas-upnp-org:device:WANDevice:1</deviceType>
        <deviceList>
          <device>
            <deviceType>urn:schemas-upnp-org:device:WANConnectionDevice:1</deviceType>
            <serviceList>
              <service>
                <serviceType>urn:schemas-upnp-org:service:WANIPConnection:1</serviceType>
                <serviceId>urn:upnp-org:serviceId:WANIPConn1</serviceId>
                <controlURL>/ctl/IPConn</controlURL>
                <eventSubURL>/evt/IPConn</eventSubURL>
                <SCPDURL>/WANIPCn.xml</SCPDURL>
              </service>
            </serviceList>
          </device>
        </deviceList>
      </device>
    </deviceList>
  </device>
</root>"#,
        device_type
    )
}
