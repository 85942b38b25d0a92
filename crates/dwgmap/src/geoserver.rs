//! GeoServer REST client: publishes GeoPackage containers as tile layers and
//! builds the tile URL templates handed back to browsers.

use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, info};

use crate::error::GeoServerError;
use crate::settings::{GeoServerSettings, Settings};

/// Style applied to raster tile requests.
const RASTER_STYLE: &str = "dwg_raster_style";

/// Table name inside every packaged container.
const NATIVE_LAYER: &str = "entities";

const SLD_CONTENT_TYPE: &str = "application/vnd.ogc.sld+xml";

/// SLD for the raster style: transparent polygon fills with colored outlines,
/// lines stroked in the entity's `line_color`, text labelled from the DXF
/// `Text` attribute. Null colors fall back to neutral greys.
const RASTER_SLD: &str = r##"<?xml version="1.0" encoding="ISO-8859-1"?>
<StyledLayerDescriptor version="1.0.0"
    xsi:schemaLocation="http://www.opengis.net/sld StyledLayerDescriptor.xsd"
    xmlns="http://www.opengis.net/sld"
    xmlns:ogc="http://www.opengis.net/ogc"
    xmlns:xlink="http://www.w3.org/1999/xlink"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <NamedLayer>
    <Name>dwg_raster_style</Name>
    <UserStyle>
      <Title>DWG Raster Style</Title>
      <FeatureTypeStyle>
        <Rule>
          <Name>Polygon</Name>
          <Filter>
            <Or>
              <PropertyIsEqualTo>
                <Function name="geometryType"><PropertyName>geom</PropertyName></Function>
                <Literal>Polygon</Literal>
              </PropertyIsEqualTo>
              <PropertyIsEqualTo>
                <Function name="geometryType"><PropertyName>geom</PropertyName></Function>
                <Literal>MultiPolygon</Literal>
              </PropertyIsEqualTo>
            </Or>
          </Filter>
          <PolygonSymbolizer>
            <Fill>
              <CssParameter name="fill">#000000</CssParameter>
              <CssParameter name="fill-opacity">0.0</CssParameter>
            </Fill>
            <Stroke>
              <CssParameter name="stroke">
                <ogc:Function name="if_then_else">
                  <ogc:Function name="isNull"><PropertyName>line_color</PropertyName></ogc:Function>
                  <ogc:Literal>#555555</ogc:Literal>
                  <PropertyName>line_color</PropertyName>
                </ogc:Function>
              </CssParameter>
              <CssParameter name="stroke-width">1</CssParameter>
            </Stroke>
          </PolygonSymbolizer>
        </Rule>
        <Rule>
          <Name>Line</Name>
          <Filter>
            <Or>
              <PropertyIsEqualTo>
                <Function name="geometryType"><PropertyName>geom</PropertyName></Function>
                <Literal>LineString</Literal>
              </PropertyIsEqualTo>
              <PropertyIsEqualTo>
                <Function name="geometryType"><PropertyName>geom</PropertyName></Function>
                <Literal>MultiLineString</Literal>
              </PropertyIsEqualTo>
            </Or>
          </Filter>
          <LineSymbolizer>
            <Stroke>
              <CssParameter name="stroke">
                <ogc:Function name="if_then_else">
                  <ogc:Function name="isNull"><PropertyName>line_color</PropertyName></ogc:Function>
                  <ogc:Literal>#FFFFFF</ogc:Literal>
                  <PropertyName>line_color</PropertyName>
                </ogc:Function>
              </CssParameter>
              <CssParameter name="stroke-width">1</CssParameter>
            </Stroke>
          </LineSymbolizer>
        </Rule>
        <Rule>
          <Name>Text</Name>
          <Filter>
            <PropertyIsNotEqualTo>
              <PropertyName>Text</PropertyName>
              <Literal></Literal>
            </PropertyIsNotEqualTo>
          </Filter>
          <TextSymbolizer>
            <Label><PropertyName>Text</PropertyName></Label>
            <Font>
              <CssParameter name="font-family">Arial</CssParameter>
              <CssParameter name="font-size">10</CssParameter>
            </Font>
            <Fill>
              <CssParameter name="fill">#DDDDDD</CssParameter>
            </Fill>
          </TextSymbolizer>
        </Rule>
      </FeatureTypeStyle>
    </UserStyle>
  </NamedLayer>
</StyledLayerDescriptor>
"##;

pub struct GeoServerClient {
    http: Client,
    settings: GeoServerSettings,
    request_timeout: Duration,
}

impl GeoServerClient {
    /// `request_timeout` bounds each REST call individually; publishing is a
    /// short fixed sequence of them.
    pub fn new(
        settings: GeoServerSettings,
        request_timeout: Duration,
    ) -> Result<Self, GeoServerError> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            settings,
            request_timeout,
        })
    }

    /// Client wired from runtime settings: the configured publish timeout
    /// caps each REST call.
    pub fn from_settings(settings: &Settings) -> Result<Self, GeoServerError> {
        Self::new(settings.geoserver.clone(), settings.timeouts.publish())
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn workspace(&self) -> &str {
        &self.settings.workspace
    }

    fn rest(&self, path: &str) -> String {
        format!("{}/rest/{}", self.settings.url.trim_end_matches('/'), path)
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response, GeoServerError> {
        Ok(self
            .http
            .get(url)
            .basic_auth(&self.settings.user, Some(&self.settings.password))
            .send()?)
    }

    fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::blocking::Response, GeoServerError> {
        Ok(self
            .http
            .post(url)
            .basic_auth(&self.settings.user, Some(&self.settings.password))
            .json(body)
            .send()?)
    }

    fn put_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::blocking::Response, GeoServerError> {
        Ok(self
            .http
            .put(url)
            .basic_auth(&self.settings.user, Some(&self.settings.password))
            .json(body)
            .send()?)
    }

    fn post_body(
        &self,
        url: &str,
        content_type: &'static str,
        body: String,
    ) -> Result<reqwest::blocking::Response, GeoServerError> {
        Ok(self
            .http
            .post(url)
            .basic_auth(&self.settings.user, Some(&self.settings.password))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()?)
    }

    fn put_body(
        &self,
        url: &str,
        content_type: &'static str,
        body: String,
    ) -> Result<reqwest::blocking::Response, GeoServerError> {
        Ok(self
            .http
            .put(url)
            .basic_auth(&self.settings.user, Some(&self.settings.password))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()?)
    }

    /// Creates the configured workspace if it does not exist yet.
    pub fn ensure_workspace(&self) -> Result<(), GeoServerError> {
        let url = self.rest(&format!("workspaces/{}.json", self.settings.workspace));
        let response = self.get(&url)?;
        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!(workspace = %self.settings.workspace, "Creating workspace");
                let body = json!({"workspace": {"name": self.settings.workspace}});
                let created = self.post_json(&self.rest("workspaces"), &body)?;
                expect_created("create workspace", created)
            }
            status => Err(unexpected("check workspace", status, response)),
        }
    }

    /// Registers the GeoPackage as a datastore, exposes its entities table as
    /// a feature type, attaches the raster style, and configures the tile
    /// cache. Every step is idempotent: existing resources are updated or
    /// left untouched.
    pub fn publish_gpkg(
        &self,
        gpkg_path: &Path,
        store_name: &str,
        layer_name: &str,
    ) -> Result<(), GeoServerError> {
        if !gpkg_path.exists() {
            return Err(GeoServerError::MissingFile(gpkg_path.to_path_buf()));
        }
        self.ensure_workspace()?;
        self.ensure_raster_style()?;
        self.ensure_datastore(gpkg_path, store_name)?;
        self.ensure_featuretype(store_name, layer_name)?;
        self.attach_raster_style(layer_name)?;
        self.enable_tile_cache(layer_name)?;
        info!(store = store_name, layer = layer_name, "Layer published");
        Ok(())
    }

    /// Uploads the raster SLD, creating the style on first publish and
    /// refreshing it afterwards so installs pick up template changes.
    fn ensure_raster_style(&self) -> Result<(), GeoServerError> {
        let ws = &self.settings.workspace;
        let url = self.rest(&format!("workspaces/{ws}/styles/{RASTER_STYLE}.json"));
        let response = self.get(&url)?;
        match response.status() {
            StatusCode::OK => {
                let updated = self.put_body(
                    &self.rest(&format!("workspaces/{ws}/styles/{RASTER_STYLE}")),
                    SLD_CONTENT_TYPE,
                    RASTER_SLD.to_string(),
                )?;
                expect_created("update style", updated)
            }
            StatusCode::NOT_FOUND => {
                debug!(style = RASTER_STYLE, "Creating raster style");
                let created = self.post_body(
                    &format!(
                        "{}?name={RASTER_STYLE}",
                        self.rest(&format!("workspaces/{ws}/styles"))
                    ),
                    SLD_CONTENT_TYPE,
                    RASTER_SLD.to_string(),
                )?;
                expect_created("create style", created)
            }
            status => Err(unexpected("check style", status, response)),
        }
    }

    /// Adds the raster style to the layer's available styles. It must not
    /// become the default style: vector tiles need the raw data, raster
    /// requests select it through the STYLES parameter.
    fn attach_raster_style(&self, layer_name: &str) -> Result<(), GeoServerError> {
        let ws = &self.settings.workspace;
        let body = json!({
            "layer": {
                "styles": {
                    "style": [{"name": RASTER_STYLE, "workspace": ws}],
                }
            }
        });
        let url = self.rest(&format!("layers/{ws}:{layer_name}.json"));
        let response = self.put_json(&url, &body)?;
        expect_created("attach style", response)
    }

    /// Registers the layer with the embedded tile cache, enabling the
    /// mapbox-vector-tile format the MVT URL template requests.
    fn enable_tile_cache(&self, layer_name: &str) -> Result<(), GeoServerError> {
        let base = self.settings.url.trim_end_matches('/').to_string();
        let ws = &self.settings.workspace;
        let url = format!("{base}/gwc/rest/layers/{ws}:{layer_name}.xml");
        let xml = self.gwc_layer_xml(layer_name);
        let response = self.put_body(&url, "application/xml", xml.clone())?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            StatusCode::NOT_FOUND => {
                let created =
                    self.post_body(&format!("{base}/gwc/rest/layers"), "application/xml", xml)?;
                expect_created("create tile layer", created)
            }
            status => Err(unexpected("configure tile layer", status, response)),
        }
    }

    /// GWC layer document: tile formats, grid subsets, and a STYLES filter
    /// allowing the raster style on cached requests.
    fn gwc_layer_xml(&self, layer_name: &str) -> String {
        let ws = &self.settings.workspace;
        format!(
            "<GeoServerLayer>\
             <enabled>true</enabled>\
             <inMemoryCached>true</inMemoryCached>\
             <name>{ws}:{layer_name}</name>\
             <gutter>100</gutter>\
             <mimeFormats>\
             <string>image/png</string>\
             <string>image/jpeg</string>\
             <string>application/vnd.mapbox-vector-tile</string>\
             </mimeFormats>\
             <gridSubsets>\
             <gridSubset>\
             <gridSetName>EPSG:900913</gridSetName>\
             <extent><coords>\
             <double>-20037508.34</double>\
             <double>-20037508.34</double>\
             <double>20037508.34</double>\
             <double>20037508.34</double>\
             </coords></extent>\
             </gridSubset>\
             <gridSubset>\
             <gridSetName>EPSG:4326</gridSetName>\
             <extent><coords>\
             <double>-180.0</double>\
             <double>-90.0</double>\
             <double>180.0</double>\
             <double>90.0</double>\
             </coords></extent>\
             </gridSubset>\
             </gridSubsets>\
             <metaWidthHeight><int>4</int><int>4</int></metaWidthHeight>\
             <expireCache>0</expireCache>\
             <expireClients>0</expireClients>\
             <parameterFilters>\
             <stringParameterFilter>\
             <key>STYLES</key>\
             <defaultValue></defaultValue>\
             <values>\
             <string></string>\
             <string>{ws}:{RASTER_STYLE}</string>\
             </values>\
             </stringParameterFilter>\
             </parameterFilters>\
             </GeoServerLayer>"
        )
    }

    fn ensure_datastore(&self, gpkg_path: &Path, store_name: &str) -> Result<(), GeoServerError> {
        let ws = &self.settings.workspace;
        let url = self.rest(&format!("workspaces/{ws}/datastores/{store_name}.json"));
        let response = self.get(&url)?;
        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let body = json!({
                    "dataStore": {
                        "name": store_name,
                        "type": "GeoPackage",
                        "enabled": true,
                        "connectionParameters": {
                            "database": format!("file://{}", gpkg_path.display()),
                            "dbtype": "geopackage",
                        },
                    }
                });
                let created =
                    self.post_json(&self.rest(&format!("workspaces/{ws}/datastores.json")), &body)?;
                expect_created("create datastore", created)
            }
            status => Err(unexpected("check datastore", status, response)),
        }
    }

    fn ensure_featuretype(&self, store_name: &str, layer_name: &str) -> Result<(), GeoServerError> {
        let ws = &self.settings.workspace;
        let url = self.rest(&format!(
            "workspaces/{ws}/datastores/{store_name}/featuretypes/{layer_name}.json"
        ));
        let response = self.get(&url)?;
        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let body = json!({
                    "featureType": {
                        "name": layer_name,
                        "title": layer_name,
                        "nativeName": NATIVE_LAYER,
                    }
                });
                let created = self.post_json(
                    &self.rest(&format!(
                        "workspaces/{ws}/datastores/{store_name}/featuretypes.json"
                    )),
                    &body,
                )?;
                expect_created("create feature type", created)
            }
            status => Err(unexpected("check feature type", status, response)),
        }
    }

    /// WMTS vector tile URL template for map clients. `{z}`/`{y}`/`{x}` are
    /// left literal for the client's tile loader to substitute.
    pub fn mvt_url(&self, layer_name: &str) -> String {
        format!(
            "{base}/gwc/service/wmts?layer={layer}\
             &tilematrixset=EPSG:900913\
             &Service=WMTS&Request=GetTile&Version=1.0.0\
             &Format=application/vnd.mapbox-vector-tile\
             &TileMatrix=EPSG:900913:{{z}}&TileRow={{y}}&TileCol={{x}}",
            base = self.public_base(),
            layer = self.qualified(layer_name),
        )
    }

    /// WMTS raster tile URL template with the drawing style applied.
    pub fn raster_url(&self, layer_name: &str) -> String {
        format!(
            "{base}/gwc/service/wmts?layer={layer}\
             &tilematrixset=EPSG:900913\
             &Service=WMTS&Request=GetTile&Version=1.0.0\
             &Format=image/png\
             &style={style}\
             &TileMatrix=EPSG:900913:{{z}}&TileRow={{y}}&TileCol={{x}}",
            base = self.public_base(),
            layer = self.qualified(layer_name),
            style = self.qualified(RASTER_STYLE),
        )
    }

    pub fn wmts_capabilities_url(&self) -> String {
        format!("{}/gwc/service/wmts?request=GetCapabilities", self.public_base())
    }

    fn public_base(&self) -> String {
        self.settings.public_base().trim_end_matches('/').to_string()
    }

    /// Workspace-qualified name with the separator percent-encoded the way
    /// GWC expects it in query strings.
    fn qualified(&self, name: &str) -> String {
        format!("{}%3A{}", self.settings.workspace, name)
    }
}

fn expect_created(
    action: &'static str,
    response: reqwest::blocking::Response,
) -> Result<(), GeoServerError> {
    let status = response.status();
    if status == StatusCode::OK || status == StatusCode::CREATED {
        return Ok(());
    }
    Err(unexpected(action, status, response))
}

fn unexpected(
    action: &'static str,
    status: StatusCode,
    response: reqwest::blocking::Response,
) -> GeoServerError {
    let body = response.text().unwrap_or_default();
    let mut body = body.trim().to_string();
    body.truncate(300);
    GeoServerError::Unexpected {
        action,
        status: status.as_u16(),
        body,
    }
}
